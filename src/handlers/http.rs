//! HTTP handlers: health, on-demand status, and session statistics.
//!
//! Status checks here run their own query and never touch the poll loop's
//! tracker; current online times come from the open sessions in storage.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use crate::db::{
    player_stats, player_stats_all, players_never_played, server_last_up, server_stats,
    sessions_open_list, DbPool, PlayerStatsRow,
};
use crate::error::{AppError, AppResult};
use crate::models::snapshot::Snapshot;
use crate::services::notifier::clear_color_tags;
use crate::services::poller::{now_seconds, ON_DEMAND_REQUEST_ID};
use crate::services::QueryClient;

/// Shared application state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub query_client: QueryClient,
    pub db: DbPool,
}

impl AppState {
    /// Fresh snapshot or `Offline`.
    async fn snapshot(&self) -> AppResult<Snapshot> {
        self.query_client
            .query(ON_DEMAND_REQUEST_ID)
            .await
            .ok_or(AppError::Offline)
    }
}

/// GET /health: liveness probe.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "presence-watch" })),
    )
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub server_name: String,
    pub snapshot: Snapshot,
}

/// GET /status: query the server now.
pub async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    let snapshot = state.snapshot().await?;
    Ok(Json(StatusResponse {
        server_name: clear_color_tags(&snapshot.hostname),
        snapshot,
    }))
}

#[derive(Debug, Serialize)]
pub struct ServerStatsResponse {
    pub server_name: String,
    /// Seconds since the last server session opened.
    pub current_uptime_seconds: Option<i64>,
    pub total_uptime_seconds: i64,
    pub session_count: i64,
}

/// GET /server: uptime statistics, only while the server is up.
pub async fn server(State(state): State<AppState>) -> Result<Json<ServerStatsResponse>, AppError> {
    let snapshot = state.snapshot().await?;
    let now = now_seconds();
    let stats = server_stats(&state.db, now).await?;
    let last_up = server_last_up(&state.db).await?;
    Ok(Json(ServerStatsResponse {
        server_name: clear_color_tags(&snapshot.hostname),
        current_uptime_seconds: last_up.map(|t| now - t),
        total_uptime_seconds: stats.uptime_seconds,
        session_count: stats.session_count,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PlayersQuery {
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Serialize)]
pub struct PlayerStatsResponse {
    pub name: String,
    pub session_count: i64,
    pub total_online_seconds: i64,
    /// Mean session length; unset before the first session.
    pub average_session_seconds: Option<i64>,
    /// Set when the player has an open session.
    pub current_online_seconds: Option<i64>,
}

impl PlayerStatsResponse {
    /// Entry for `name`; a player without stored sessions gets zeroed totals.
    fn new(name: String, stats: Option<&PlayerStatsRow>, open: &HashMap<String, i64>, now: i64) -> Self {
        let (session_count, total_online_seconds) =
            stats.map_or((0, 0), |r| (r.session_count, r.online_seconds));
        Self {
            current_online_seconds: open.get(&name).map(|t| now - t),
            average_session_seconds: (session_count > 0)
                .then(|| total_online_seconds / session_count),
            name,
            session_count,
            total_online_seconds,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PlayersResponse {
    pub server_name: Option<String>,
    pub numplayers: Option<String>,
    pub maxplayers: Option<String>,
    pub players: Vec<PlayerStatsResponse>,
}

/// GET /players?all=<bool>: current players, or everyone ever seen.
pub async fn players(
    State(state): State<AppState>,
    Query(query): Query<PlayersQuery>,
) -> Result<Json<PlayersResponse>, AppError> {
    let now = now_seconds();
    let open: HashMap<String, i64> = sessions_open_list(&state.db).await?.into_iter().collect();

    if query.all {
        let mut players: Vec<PlayerStatsResponse> = player_stats_all(&state.db, now)
            .await?
            .into_iter()
            .map(|r| PlayerStatsResponse::new(r.name.clone(), Some(&r), &open, now))
            .collect();
        players.extend(
            players_never_played(&state.db)
                .await?
                .into_iter()
                .map(|name| PlayerStatsResponse::new(name, None, &open, now)),
        );
        return Ok(Json(PlayersResponse {
            server_name: None,
            numplayers: None,
            maxplayers: None,
            players,
        }));
    }

    let snapshot = state.snapshot().await?;
    let mut players = Vec::with_capacity(snapshot.players.len());
    for name in &snapshot.players {
        let stats = player_stats(&state.db, name, now).await?;
        players.push(PlayerStatsResponse::new(name.clone(), stats.as_ref(), &open, now));
    }
    players.sort_by(|a, b| b.total_online_seconds.cmp(&a.total_online_seconds));

    Ok(Json(PlayersResponse {
        server_name: Some(clear_color_tags(&snapshot.hostname)),
        numplayers: Some(snapshot.numplayers),
        maxplayers: Some(snapshot.maxplayers),
        players,
    }))
}

/// GET /players/:name: statistics of one player.
pub async fn player(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<PlayerStatsResponse>, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("player name required".to_string()));
    }
    let now = now_seconds();
    let open: HashMap<String, i64> = sessions_open_list(&state.db).await?.into_iter().collect();
    let stats = player_stats(&state.db, name, now).await?;
    Ok(Json(PlayerStatsResponse::new(
        name.to_string(),
        stats.as_ref(),
        &open,
        now,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(session_count: i64, online_seconds: i64) -> PlayerStatsRow {
        PlayerStatsRow {
            name: "alice".to_string(),
            session_count,
            online_seconds,
        }
    }

    #[test]
    fn entry_from_stored_sessions() {
        let open = HashMap::from([("alice".to_string(), 900)]);
        let entry = PlayerStatsResponse::new("alice".to_string(), Some(&row(4, 1000)), &open, 1000);
        assert_eq!(entry.name, "alice");
        assert_eq!(entry.total_online_seconds, 1000);
        assert_eq!(entry.average_session_seconds, Some(250));
        assert_eq!(entry.current_online_seconds, Some(100));
    }

    #[test]
    fn current_player_without_stats_is_listed_zeroed() {
        let open = HashMap::new();
        let entry = PlayerStatsResponse::new("newcomer".to_string(), None, &open, 1000);
        assert_eq!(entry.name, "newcomer");
        assert_eq!(entry.session_count, 0);
        assert_eq!(entry.total_online_seconds, 0);
        assert_eq!(entry.average_session_seconds, None);
        assert_eq!(entry.current_online_seconds, None);
    }
}
