//! Shared backend on top of Redis

use async_trait::async_trait;
use redis::AsyncCommands;
use std::marker::PhantomData;
use tracing::{debug, warn};

use crate::{CacheBackend, CacheError, Cacheable, CachedValue, RemoteCacheConfig};

const SCAN_BATCH: usize = 500;

/// Redis backend shared by every instance.
///
/// Values are stored as JSON under `key_prefix + key` with a TTL. The data
/// is shared, so mutations are not fanned out.
pub struct RedisBackend<V: Cacheable> {
    name: String,
    redis: redis::aio::ConnectionManager,
    config: RemoteCacheConfig,
    _value: PhantomData<fn() -> V>,
}

impl<V: Cacheable> RedisBackend<V> {
    pub async fn new(
        name: impl Into<String>,
        redis_client: redis::Client,
        config: RemoteCacheConfig,
    ) -> Result<Self, redis::RedisError> {
        let redis = redis::aio::ConnectionManager::new(redis_client).await?;
        Ok(Self::from_connection(name, redis, config))
    }

    pub fn from_connection(
        name: impl Into<String>,
        redis: redis::aio::ConnectionManager,
        config: RemoteCacheConfig,
    ) -> Self {
        Self {
            name: name.into(),
            redis,
            config,
            _value: PhantomData,
        }
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }
}

#[async_trait]
impl<V: Cacheable> CacheBackend<V> for RedisBackend<V> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CachedValue<V>>, CacheError> {
        let redis_key = self.redis_key(key);
        let mut conn = self.redis.clone();

        let Some(json) = conn.get::<_, Option<String>>(&redis_key).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<CachedValue<V>>(&json) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(
                    "Failed to deserialize cached value for key {} ({}). Deleting corrupt entry.",
                    key, e
                );
                if let Err(del_err) = conn.del::<_, ()>(&redis_key).await {
                    warn!(
                        "Failed to delete corrupt entry for key {} (Redis key: {}): {}",
                        key, redis_key, del_err
                    );
                }
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, value: CachedValue<V>) -> Result<(), CacheError> {
        let json = serde_json::to_string(&value)?;
        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(
            self.redis_key(key),
            json,
            self.config.time_to_live.as_secs().max(1),
        )
        .await?;
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(self.redis_key(key)).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let pattern = format!("{}*", escape_glob(&self.config.key_prefix));
        let mut conn = self.redis.clone();
        let mut cursor: u64 = 0;
        let mut removed = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                removed += keys.len();
                conn.del::<_, ()>(&keys).await?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(backend = %self.name, removed, "Cleared Redis backend");
        Ok(())
    }
}

/// Escape Redis glob metacharacters so the prefix matches literally.
fn escape_glob(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("cache:"), "cache:");
        assert_eq!(escape_glob("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
    }
}
