//! Storage backends a cache line can chain together
//!
//! - [`MokaBackend`]: in-process, per instance, takes part in invalidation
//! - [`RedisBackend`]: shared across instances, needs no invalidation

mod memory;
mod remote;

pub use memory::MokaBackend;
pub use remote::RedisBackend;

use async_trait::async_trait;

use crate::{CacheError, CachedValue};

/// A single storage engine.
///
/// Implementations only need to make each call safe on its own; the cache
/// line serialises calls that must be atomic together. Errors are returned
/// to the cache line caller as-is.
#[async_trait]
pub trait CacheBackend<V: Send + Sync + 'static>: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<CachedValue<V>>, CacheError>;

    async fn put(&self, key: &str, value: CachedValue<V>) -> Result<(), CacheError>;

    async fn evict(&self, key: &str) -> Result<(), CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;
}
