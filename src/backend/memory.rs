//! In-process backend on top of Moka

use async_trait::async_trait;
use moka::future::Cache;

use crate::{
    CacheBackend, CacheError, Cacheable, CachedValue, Fanout, Fingerprint, LocalCacheConfig,
    LocalInvalidatable, ProcessIdentity,
};

/// Local, bounded in-memory backend.
///
/// Every mutation is announced through the composed [`Fanout`] so that the
/// same key is invalidated in peer processes.
pub struct MokaBackend<V: Cacheable> {
    name: String,
    cache: Cache<String, CachedValue<V>>,
    fanout: Fanout,
}

impl<V: Cacheable> MokaBackend<V> {
    pub fn new(name: impl Into<String>, config: &LocalCacheConfig, fanout: Fanout) -> Self {
        let mut builder =
            Cache::<String, CachedValue<V>>::builder().max_capacity(config.max_capacity);
        if let Some(ttl) = config.time_to_live {
            builder = builder.time_to_live(ttl);
        }

        Self {
            name: name.into(),
            cache: builder.build(),
            fanout,
        }
    }
}

#[async_trait]
impl<V: Cacheable> CacheBackend<V> for MokaBackend<V> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CachedValue<V>>, CacheError> {
        Ok(self.cache.get(key).await)
    }

    async fn put(&self, key: &str, value: CachedValue<V>) -> Result<(), CacheError> {
        self.cache.insert(key.to_owned(), value.clone()).await;
        self.fanout.fanout_put(key, &value);
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<(), CacheError> {
        self.cache.invalidate(key).await;
        self.fanout.fanout_evict(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.cache.invalidate_all();
        self.fanout.fanout_clear();
        Ok(())
    }
}

#[async_trait]
impl<V: Cacheable> LocalInvalidatable for MokaBackend<V> {
    fn identity(&self) -> &ProcessIdentity {
        self.fanout.identity()
    }

    async fn fingerprint(&self, key: &str) -> Result<Option<Fingerprint>, CacheError> {
        match self.cache.get(key).await {
            Some(value) => Ok(Some(Fingerprint::of(&value)?)),
            None => Ok(None),
        }
    }

    async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    async fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MokaBackend<String> {
        MokaBackend::new(
            "l1",
            &LocalCacheConfig::default(),
            Fanout::disabled(ProcessIdentity::generate()),
        )
    }

    #[tokio::test]
    async fn test_crud() {
        let backend = backend();
        assert_eq!(backend.name(), "l1");
        assert_eq!(backend.get("a&1").await.unwrap(), None);

        backend
            .put("a&1", CachedValue::Value("one".to_owned()))
            .await
            .unwrap();
        backend.put("a&2", CachedValue::Null).await.unwrap();
        assert_eq!(
            backend.get("a&1").await.unwrap(),
            Some(CachedValue::Value("one".to_owned()))
        );
        assert_eq!(backend.get("a&2").await.unwrap(), Some(CachedValue::Null));

        backend.evict("a&1").await.unwrap();
        assert_eq!(backend.get("a&1").await.unwrap(), None);

        backend.clear().await.unwrap();
        assert_eq!(backend.get("a&2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fingerprint_tracks_content() {
        let backend = backend();
        assert_eq!(backend.fingerprint("a&1").await.unwrap(), None);

        let value = CachedValue::Value("one".to_owned());
        backend.put("a&1", value.clone()).await.unwrap();
        assert_eq!(
            backend.fingerprint("a&1").await.unwrap(),
            Some(Fingerprint::of(&value).unwrap())
        );
    }
}
