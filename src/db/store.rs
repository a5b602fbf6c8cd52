//! `SessionStore` backed by PostgreSQL.

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

use super::repositories::{
    player_ensure, server_last_up, server_session_close, server_session_open, session_close,
    session_open, sessions_open_list,
};
use super::DbPool;
use crate::error::AppResult;
use crate::services::store::SessionStore;

#[derive(Clone)]
pub struct PgSessionStore {
    pool: DbPool,
}

impl PgSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn open_player_session(&self, name: &str, time: i64) -> AppResult<()> {
        player_ensure(&self.pool, name).await?;
        session_open(&self.pool, name, time).await
    }

    async fn close_player_session(&self, name: &str, time: i64) -> AppResult<()> {
        let closed = session_close(&self.pool, name, time).await?;
        if closed == 0 {
            debug!(player = %name, "no open session to close");
        }
        Ok(())
    }

    async fn open_server_session(&self, time: i64) -> AppResult<()> {
        server_session_open(&self.pool, time).await
    }

    async fn close_server_session(&self, time: i64) -> AppResult<()> {
        server_session_close(&self.pool, time).await?;
        Ok(())
    }

    async fn last_known_open_players(&self) -> AppResult<HashMap<String, i64>> {
        Ok(sessions_open_list(&self.pool).await?.into_iter().collect())
    }

    async fn last_server_up(&self) -> AppResult<Option<i64>> {
        server_last_up(&self.pool).await
    }
}
