//! Publishing side of the invalidation channel

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use super::InvalidationMessage;
use crate::{CacheError, InvalidationConfig};

/// Broadcasts invalidation messages to every process in the fleet
#[async_trait]
pub trait InvalidationProvider: Send + Sync {
    async fn publish(&self, message: &InvalidationMessage) -> Result<(), CacheError>;
}

/// Publishes invalidation messages on a Redis pub/sub channel.
///
/// With no channel configured, publishing is a silent no-op.
pub struct RedisInvalidationProvider {
    redis: redis::aio::ConnectionManager,
    channel: Option<String>,
}

impl RedisInvalidationProvider {
    pub async fn new(
        redis_client: redis::Client,
        config: InvalidationConfig,
    ) -> Result<Self, redis::RedisError> {
        let redis = redis::aio::ConnectionManager::new(redis_client).await?;
        Ok(Self::from_connection(redis, config))
    }

    pub fn from_connection(
        redis: redis::aio::ConnectionManager,
        config: InvalidationConfig,
    ) -> Self {
        Self {
            redis,
            channel: config.channel.filter(|c| !c.trim().is_empty()),
        }
    }
}

#[async_trait]
impl InvalidationProvider for RedisInvalidationProvider {
    async fn publish(&self, message: &InvalidationMessage) -> Result<(), CacheError> {
        let Some(channel) = self.channel.as_deref() else {
            debug!("No invalidation channel configured, not publishing");
            return Ok(());
        };

        let payload = message.to_wire()?;
        let mut conn = self.redis.clone();
        conn.publish::<_, _, ()>(channel, &payload).await?;
        debug!(
            "Cache invalidation published on channel '{}': {}",
            channel, payload
        );
        Ok(())
    }
}
