//! cachechain - Chained multi-tier caching with cross-process invalidation
//!
//! This library coordinates a stack of cache backends:
//! - Local in-memory Moka cache (per process)
//! - Redis cache (shared across processes)
//! - Any other store implementing [`CacheBackend`]
//!
//! The cache supports:
//! - Read-through promotion of values found in later backends
//! - Per-key locking so a missing value is loaded once (stampede protection)
//! - Optional caching of null results
//! - Invalidation of local caches in peer processes, with content
//!   fingerprints so unchanged reloads do not evict anything

mod backend;
mod cache_line;
mod config;
mod error;
pub mod invalidation;
mod key;
mod local;
mod lock;
mod value;

pub use backend::{CacheBackend, MokaBackend, RedisBackend};
pub use cache_line::{CacheLine, DataLoader};
pub use config::{CacheLineConfig, InvalidationConfig, LocalCacheConfig, RemoteCacheConfig};
pub use error::{BoxError, CacheError};
pub use invalidation::{
    ApplyReport, BroadcastBus, Fingerprint, InvalidationListener, InvalidationMessage,
    InvalidationProvider, RedisInvalidationProvider, RedisInvalidationSubscriber,
};
pub use key::{CacheKey, Cacheable, NAMESPACE_SEPARATOR, namespaced_key};
pub use local::{Fanout, LocalInvalidatable, ProcessIdentity};
pub use lock::{KeyGuard, LockManager, SkipOutcome};
pub use value::{CachedValue, Lookup};

// Re-export async_trait for convenience
pub use async_trait::async_trait;
