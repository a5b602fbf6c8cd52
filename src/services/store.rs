//! Collaborator seams: session persistence, event delivery and mod change delivery.

use crate::error::AppResult;
use crate::models::event::{DomainEvent, EventBatch};
use crate::models::mods::ModChange;
use async_trait::async_trait;
use std::collections::HashMap;

/// Persists player and server sessions. Times are Unix seconds.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn open_player_session(&self, name: &str, time: i64) -> AppResult<()>;

    async fn close_player_session(&self, name: &str, time: i64) -> AppResult<()>;

    async fn open_server_session(&self, time: i64) -> AppResult<()>;

    async fn close_server_session(&self, time: i64) -> AppResult<()>;

    /// Players whose sessions are still open, with their connect time.
    async fn last_known_open_players(&self) -> AppResult<HashMap<String, i64>>;

    /// Connect time of the most recent server session.
    async fn last_server_up(&self) -> AppResult<Option<i64>>;
}

/// Receives the events of one poll cycle (notification delivery).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, batch: &EventBatch) -> AppResult<()>;
}

/// Receives mod folder changes found by the mod watcher.
#[async_trait]
pub trait ModSink: Send + Sync {
    async fn publish_mods(&self, change: &ModChange) -> AppResult<()>;
}

/// Writes one event to the store.
pub async fn record_event(store: &dyn SessionStore, time: i64, event: &DomainEvent) -> AppResult<()> {
    match event {
        DomainEvent::ServerCameUp => store.open_server_session(time).await,
        DomainEvent::ServerWentDown { .. } => store.close_server_session(time).await,
        DomainEvent::PlayerJoined { name } => store.open_player_session(name, time).await,
        DomainEvent::PlayerLeft { name, .. } => store.close_player_session(name, time).await,
    }
}
