//! Cache line: several backends presented as one logical cache
//!
//! Backends are consulted in order, typically fastest first:
//!
//! ```text
//! get(key) → L1 (local) → L2 (shared) → loader
//!                ↑             │
//!                └─ backfill ──┘
//! ```
//!
//! Every mutation of a key runs under that key's lock from the shared
//! [`LockManager`], so concurrent misses for the same key run the loader
//! once while different keys proceed in parallel.

use async_trait::async_trait;
use std::{future::Future, marker::PhantomData, sync::Arc};
use tracing::debug;

use crate::key::is_blank_key;
use crate::lock::run_fail_open;
use crate::{
    BoxError, CacheBackend, CacheError, CacheKey, CacheLineConfig, Cacheable, CachedValue,
    LockManager, Lookup, SkipOutcome, namespaced_key,
};

/// Trait for loading a value that is missing from every backend.
#[async_trait]
pub trait DataLoader<K: ?Sized, V>: Send + Sync {
    /// Load the value for `key`; `Ok(None)` if it does not exist.
    async fn load(&self, key: &K) -> Result<Option<V>, BoxError>;
}

/// One logical cache line over an ordered list of backends
pub struct CacheLine<K: ?Sized, V: Cacheable> {
    inner: Arc<CacheLineInner<V>>,
    _key: PhantomData<fn(&K)>,
}

struct CacheLineInner<V: Cacheable> {
    config: CacheLineConfig,
    backends: Vec<Arc<dyn CacheBackend<V>>>,
    locks: Arc<LockManager>,
}

impl<K: ?Sized, V: Cacheable> Clone for CacheLine<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _key: PhantomData,
        }
    }
}

impl<K: CacheKey + ?Sized, V: Cacheable> CacheLine<K, V> {
    pub fn new(
        config: CacheLineConfig,
        backends: Vec<Arc<dyn CacheBackend<V>>>,
        locks: Arc<LockManager>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheLineInner {
                config,
                backends,
                locks,
            }),
            _key: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn allows_null_values(&self) -> bool {
        self.inner.config.allow_null_values
    }

    /// The namespaced key that backends store `key` under
    pub fn key_for(&self, key: &K) -> String {
        namespaced_key(&self.inner.config.name, key)
    }

    /// Look `key` up without loading it.
    ///
    /// A hit in a later backend is copied into every earlier backend. Only
    /// that backfill takes the key lock; plain hits and misses do not.
    pub async fn lookup(&self, key: &K) -> Result<Lookup<V>, CacheError> {
        let cache_key = self.key_for(key);
        match self.scan(&cache_key).await? {
            None => {
                debug!(line = %self.name(), key = %cache_key, "Cache miss");
                Ok(Lookup::Absent)
            }
            Some((0, found)) => Ok(found.into()),
            Some(_) => {
                let _guard = self.inner.locks.lock(&cache_key).await;
                self.lookup_locked(&cache_key).await
            }
        }
    }

    /// Get the value for `key`, running `loader` on a miss.
    ///
    /// Concurrent calls for the same key wait for each other, so `loader`
    /// runs at most once per miss. A loader error or panic is logged and
    /// reported as `Ok(None)` with nothing cached; backend errors are
    /// returned.
    pub async fn get<F, Fut>(&self, key: &K, loader: F) -> Result<Option<V>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, BoxError>>,
    {
        let cache_key = self.key_for(key);
        let _guard = self.inner.locks.lock(&cache_key).await;
        self.fill_locked(&cache_key, loader).await
    }

    /// [`Self::get`] with a [`DataLoader`]
    pub async fn get_with<L>(&self, key: &K, loader: &L) -> Result<Option<V>, CacheError>
    where
        L: DataLoader<K, V> + ?Sized,
    {
        self.get(key, || loader.load(key)).await
    }

    /// Best-effort preload of `key`.
    ///
    /// Does nothing and returns `false` if another task holds the key right
    /// now. Failures, including backend errors, are logged and not returned.
    pub async fn warm<F, Fut>(&self, key: &K, loader: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, BoxError>>,
    {
        let cache_key = self.key_for(key);
        let outcome = self
            .inner
            .locks
            .skip_sync(&cache_key, || self.fill_locked(&cache_key, loader))
            .await;
        matches!(outcome, SkipOutcome::Ran(_))
    }

    /// Store `value` in every backend.
    pub async fn put(&self, key: &K, value: V) -> Result<(), CacheError> {
        if is_blank_key(key) {
            debug!(line = %self.name(), "Ignoring put with blank key");
            return Ok(());
        }
        let cache_key = self.key_for(key);
        let _guard = self.inner.locks.lock(&cache_key).await;
        self.store(&cache_key, CachedValue::Value(value)).await
    }

    /// Store `value` unless a real value is already cached.
    ///
    /// Returns the existing value, in which case nothing is written. A cached
    /// null counts as absent and is overwritten.
    pub async fn put_if_absent(&self, key: &K, value: V) -> Result<Option<V>, CacheError> {
        if is_blank_key(key) {
            debug!(line = %self.name(), "Ignoring put_if_absent with blank key");
            return Ok(None);
        }
        let cache_key = self.key_for(key);
        let _guard = self.inner.locks.lock(&cache_key).await;
        match self.lookup_locked(&cache_key).await? {
            Lookup::Present(existing) => Ok(Some(existing)),
            Lookup::Absent | Lookup::Null => {
                self.store(&cache_key, CachedValue::Value(value)).await?;
                Ok(None)
            }
        }
    }

    /// Remove `key` from every backend.
    pub async fn evict(&self, key: &K) -> Result<(), CacheError> {
        if is_blank_key(key) {
            debug!(line = %self.name(), "Ignoring evict with blank key");
            return Ok(());
        }
        let cache_key = self.key_for(key);
        let _guard = self.inner.locks.lock(&cache_key).await;
        for backend in &self.inner.backends {
            backend.evict(&cache_key).await?;
        }
        debug!(line = %self.name(), key = %cache_key, "Evicted");
        Ok(())
    }

    /// Clear every backend. Not serialised with per-key operations.
    pub async fn clear(&self) -> Result<(), CacheError> {
        for backend in &self.inner.backends {
            backend.clear().await?;
        }
        debug!(line = %self.name(), "Cleared");
        Ok(())
    }

    /// First backend holding `cache_key`, with its position.
    async fn scan(&self, cache_key: &str) -> Result<Option<(usize, CachedValue<V>)>, CacheError> {
        for (tier, backend) in self.inner.backends.iter().enumerate() {
            if let Some(found) = backend.get(cache_key).await? {
                debug!(
                    line = %self.name(),
                    key = %cache_key,
                    backend = backend.name(),
                    "Cache hit"
                );
                return Ok(Some((tier, found)));
            }
        }
        Ok(None)
    }

    /// Scan and backfill. Caller holds the key lock.
    async fn lookup_locked(&self, cache_key: &str) -> Result<Lookup<V>, CacheError> {
        let Some((tier, found)) = self.scan(cache_key).await? else {
            return Ok(Lookup::Absent);
        };
        for backend in &self.inner.backends[..tier] {
            backend.put(cache_key, found.clone()).await?;
            debug!(
                line = %self.name(),
                key = %cache_key,
                backend = backend.name(),
                "Promoted cached value"
            );
        }
        Ok(found.into())
    }

    /// Double-checked load. Caller holds the key lock.
    async fn fill_locked<F, Fut>(&self, cache_key: &str, loader: F) -> Result<Option<V>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, BoxError>>,
    {
        match self.lookup_locked(cache_key).await? {
            Lookup::Present(value) => return Ok(Some(value)),
            Lookup::Null => return Ok(None),
            Lookup::Absent => {}
        }

        debug!(line = %self.name(), key = %cache_key, "Loading missing value");
        match run_fail_open(cache_key, loader).await {
            Some(Some(value)) => {
                self.store(cache_key, CachedValue::Value(value.clone()))
                    .await?;
                Ok(Some(value))
            }
            Some(None) => {
                if self.allows_null_values() {
                    self.store(cache_key, CachedValue::Null).await?;
                }
                Ok(None)
            }
            // Loader failed: nothing cached, the next caller retries.
            None => Ok(None),
        }
    }

    async fn store(&self, cache_key: &str, value: CachedValue<V>) -> Result<(), CacheError> {
        for backend in &self.inner.backends {
            backend.put(cache_key, value.clone()).await?;
        }
        Ok(())
    }
}
