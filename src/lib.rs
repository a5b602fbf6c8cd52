//! Game server presence watcher.
//!
//! Polls a game server over its UDP query protocol, turns successive status
//! snapshots into server up/down and player join/leave events, records
//! sessions in PostgreSQL and publishes notifications through Redis. A mod
//! folder watcher announces mods added to or removed from the server.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod protocol;
pub mod repositories;
pub mod services;

pub use config::Config;
pub use error::AppError;
pub use handlers::http::AppState;
pub use services::mod_watcher::ModWatcher;
pub use services::poller::{Dispatcher, Poller};
pub use services::presence::PresenceTracker;
pub use services::query::QueryClient;

use axum::routing::get;
use handlers::http;
use tower_http::trace::TraceLayer;

/// Build the HTTP router (health, status, statistics). Used by main and by integration tests.
pub fn create_app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/health", get(http::health))
        .route("/status", get(http::status))
        .route("/server", get(http::server))
        .route("/players", get(http::players))
        .route("/players/:name", get(http::player))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
