//! Cache configuration

use std::time::Duration;

/// Configuration for one logical cache line
#[derive(Debug, Clone)]
pub struct CacheLineConfig {
    /// Line name, used as the key namespace
    pub name: String,
    /// Cache `None` loader results as an explicit null marker
    pub allow_null_values: bool,
}

impl CacheLineConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allow_null_values: false,
        }
    }

    pub fn allow_null_values(mut self, allow: bool) -> Self {
        self.allow_null_values = allow;
        self
    }
}

/// Configuration for an in-process (local) backend
#[derive(Debug, Clone)]
pub struct LocalCacheConfig {
    /// Maximum number of entries
    pub max_capacity: u64,
    /// Time-to-live for entries, `None` keeps them until evicted
    pub time_to_live: Option<Duration>,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 1000,
            time_to_live: Some(Duration::from_secs(300)), // 5 minutes
        }
    }
}

/// Configuration for a shared (Redis) backend
#[derive(Debug, Clone)]
pub struct RemoteCacheConfig {
    /// Prefix prepended to every namespaced key
    pub key_prefix: String,
    /// Time-to-live for entries
    pub time_to_live: Duration,
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "cache:".to_owned(),
            time_to_live: Duration::from_secs(900), // 15 minutes
        }
    }
}

/// Configuration for cross-process invalidation
#[derive(Debug, Clone)]
pub struct InvalidationConfig {
    /// Pub/sub channel; `None` disables publishing
    pub channel: Option<String>,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            channel: Some("cache:invalidate".to_owned()),
        }
    }
}
