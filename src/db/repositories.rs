//! Repositories: players, player sessions, server sessions, and statistics.
//!
//! All times are Unix seconds. An open session has `disconnect_time IS NULL`;
//! statistics count open sessions up to the `now` passed in.

use crate::error::AppResult;
use sqlx::FromRow;

use super::DbPool;

// ---- Players ----

pub async fn player_ensure(pool: &DbPool, name: &str) -> AppResult<()> {
    sqlx::query("INSERT INTO players (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
        .bind(name)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn players_never_played(pool: &DbPool) -> AppResult<Vec<String>> {
    let rows = sqlx::query_scalar::<_, String>(
        r#"
        SELECT p.name
        FROM players p
        LEFT JOIN sessions s ON s.player_id = p.id
        WHERE s.player_id IS NULL
        ORDER BY p.name
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ---- Player sessions ----

pub async fn session_open(pool: &DbPool, name: &str, connect_time: i64) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sessions (player_id, connect_time)
        VALUES ((SELECT id FROM players WHERE name = $1), $2)
        "#,
    )
    .bind(name)
    .bind(connect_time)
    .execute(pool)
    .await?;
    Ok(())
}

/// Closes every open session of the player. Returns how many were closed.
pub async fn session_close(pool: &DbPool, name: &str, disconnect_time: i64) -> AppResult<u64> {
    let r = sqlx::query(
        r#"
        UPDATE sessions SET disconnect_time = $2
        WHERE player_id = (SELECT id FROM players WHERE name = $1) AND disconnect_time IS NULL
        "#,
    )
    .bind(name)
    .bind(disconnect_time)
    .execute(pool)
    .await?;
    Ok(r.rows_affected())
}

/// Players with an open session and the earliest open connect time.
pub async fn sessions_open_list(pool: &DbPool) -> AppResult<Vec<(String, i64)>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT p.name, MIN(s.connect_time)
        FROM players p
        JOIN sessions s ON s.player_id = p.id
        WHERE s.disconnect_time IS NULL
        GROUP BY p.id, p.name
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ---- Server sessions ----

pub async fn server_session_open(pool: &DbPool, connect_time: i64) -> AppResult<()> {
    sqlx::query("INSERT INTO server_sessions (connect_time) VALUES ($1)")
        .bind(connect_time)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn server_session_close(pool: &DbPool, disconnect_time: i64) -> AppResult<u64> {
    let r = sqlx::query(
        "UPDATE server_sessions SET disconnect_time = $1 WHERE disconnect_time IS NULL",
    )
    .bind(disconnect_time)
    .execute(pool)
    .await?;
    Ok(r.rows_affected())
}

pub async fn server_last_up(pool: &DbPool) -> AppResult<Option<i64>> {
    let t = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(connect_time) FROM server_sessions")
        .fetch_one(pool)
        .await?;
    Ok(t)
}

// ---- Statistics ----

#[derive(Debug, Clone, FromRow)]
pub struct PlayerStatsRow {
    pub name: String,
    pub session_count: i64,
    pub online_seconds: i64,
}

pub async fn player_stats(pool: &DbPool, name: &str, now: i64) -> AppResult<Option<PlayerStatsRow>> {
    let row = sqlx::query_as::<_, PlayerStatsRow>(
        r#"
        SELECT p.name,
               COUNT(s.player_id) AS session_count,
               COALESCE(SUM(COALESCE(s.disconnect_time, $2) - s.connect_time), 0)::BIGINT AS online_seconds
        FROM players p
        JOIN sessions s ON s.player_id = p.id
        WHERE p.name = $1
        GROUP BY p.id, p.name
        "#,
    )
    .bind(name)
    .bind(now)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Every player that has at least one session, most online time first.
pub async fn player_stats_all(pool: &DbPool, now: i64) -> AppResult<Vec<PlayerStatsRow>> {
    let rows = sqlx::query_as::<_, PlayerStatsRow>(
        r#"
        SELECT p.name,
               COUNT(s.player_id) AS session_count,
               COALESCE(SUM(COALESCE(s.disconnect_time, $1) - s.connect_time), 0)::BIGINT AS online_seconds
        FROM players p
        JOIN sessions s ON s.player_id = p.id
        GROUP BY p.id, p.name
        ORDER BY online_seconds DESC
        "#,
    )
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[derive(Debug, Clone, FromRow)]
pub struct ServerStatsRow {
    pub session_count: i64,
    pub uptime_seconds: i64,
}

pub async fn server_stats(pool: &DbPool, now: i64) -> AppResult<ServerStatsRow> {
    let row = sqlx::query_as::<_, ServerStatsRow>(
        r#"
        SELECT COUNT(connect_time) AS session_count,
               COALESCE(SUM(COALESCE(disconnect_time, $1) - connect_time), 0)::BIGINT AS uptime_seconds
        FROM server_sessions
        "#,
    )
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(row)
}
