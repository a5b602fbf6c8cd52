//! Redis connection and pub/sub publishing for notifications.

use crate::error::AppError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

const CHANNEL_PREFIX: &str = "presence:channel:";

fn channel_key(channel: &str) -> String {
    format!("{}{}", CHANNEL_PREFIX, channel)
}

/// Redis-backed repository: PUBLISH for notification batches.
///
/// One [`ConnectionManager`] is shared by every clone and reconnects on its
/// own after a dropped connection. It is created on first use so the service
/// starts while Redis is unavailable.
#[derive(Clone)]
pub struct RedisRepository {
    client: Arc<redis::Client>,
    manager: Arc<OnceCell<ConnectionManager>>,
}

impl RedisRepository {
    /// Create repository from Redis URL. Does not connect yet.
    pub fn new(redis_url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client: Arc::new(client),
            manager: Arc::new(OnceCell::new()),
        })
    }

    /// Shared managed connection, connecting on the first call.
    pub async fn connection(&self) -> Result<ConnectionManager, AppError> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                let manager = ConnectionManager::new(self.client.as_ref().clone()).await?;
                info!("redis connected");
                Ok::<_, redis::RedisError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }

    /// Publish a message to a channel (Redis PUBLISH). Returns the receiver count.
    pub async fn publish(&self, channel: &str, message: &str) -> Result<u64, AppError> {
        let mut conn = self.connection().await?;
        let key = channel_key(channel);
        let count: u64 = conn.publish(&key, message).await?;
        debug!(channel = %channel, count, "published");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_key_is_prefixed() {
        assert_eq!(channel_key("server-presence"), "presence:channel:server-presence");
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(RedisRepository::new("not a url").is_err());
    }
}
