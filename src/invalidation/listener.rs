//! Receiving side of the invalidation channel

use std::sync::Arc;
use tracing::{debug, warn};

use super::{Fingerprint, InvalidationMessage};
use crate::LocalInvalidatable;

/// What applying one message did to this process's local backends
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    /// Backends that evicted the key
    pub evicted: usize,
    /// Backends that were cleared
    pub cleared: usize,
    /// Backends already holding the announced content
    pub unchanged: usize,
    /// Backends belonging to the publishing process
    pub skipped_self: usize,
}

/// Applies invalidation messages to the local backends of this process.
pub struct InvalidationListener {
    locals: Vec<Arc<dyn LocalInvalidatable>>,
}

impl InvalidationListener {
    pub fn new(locals: Vec<Arc<dyn LocalInvalidatable>>) -> Self {
        Self { locals }
    }

    pub fn with_local(mut self, local: Arc<dyn LocalInvalidatable>) -> Self {
        self.locals.push(local);
        self
    }

    /// Handle a raw wire payload. Malformed payloads are logged and dropped.
    pub async fn on_message(&self, raw: &str) -> ApplyReport {
        match InvalidationMessage::parse(raw) {
            Ok(message) => self.apply(&message).await,
            Err(e) => {
                warn!(error = %e, payload = raw, "Dropping invalidation message");
                ApplyReport::default()
            }
        }
    }

    pub async fn apply(&self, message: &InvalidationMessage) -> ApplyReport {
        let mut report = ApplyReport::default();

        for local in &self.locals {
            // Our own writes are already reflected locally.
            if local.identity() == &message.process_identity {
                report.skipped_self += 1;
                continue;
            }

            let Some(key) = message.key.as_deref() else {
                local.invalidate_all().await;
                report.cleared += 1;
                continue;
            };

            match Self::needs_eviction(local.as_ref(), key, message.content_fingerprint.as_ref())
                .await
            {
                Some(true) => {
                    local.invalidate(key).await;
                    report.evicted += 1;
                }
                Some(false) => report.unchanged += 1,
                None => {}
            }
        }

        debug!(
            origin = %message.process_identity,
            key = message.key.as_deref().unwrap_or("*"),
            ?report,
            "Applied invalidation message"
        );
        report
    }

    /// `None` when the key is not cached here, otherwise whether the cached
    /// content differs from the announced one.
    async fn needs_eviction(
        local: &dyn LocalInvalidatable,
        key: &str,
        announced: Option<&Fingerprint>,
    ) -> Option<bool> {
        match local.fingerprint(key).await {
            Ok(None) => None,
            Ok(Some(current)) => Some(announced != Some(&current)),
            Err(e) => {
                warn!(key, error = %e, "Could not fingerprint cached value, evicting");
                Some(true)
            }
        }
    }

    /// Clear every local backend, used when messages may have been missed.
    pub async fn resync(&self) {
        for local in &self.locals {
            local.invalidate_all().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CacheBackend, CachedValue, Fanout, LocalCacheConfig, MokaBackend, ProcessIdentity,
    };

    fn local_backend(identity: &ProcessIdentity) -> Arc<MokaBackend<String>> {
        Arc::new(MokaBackend::new(
            "local",
            &LocalCacheConfig::default(),
            Fanout::disabled(identity.clone()),
        ))
    }

    fn fingerprint(value: &str) -> Fingerprint {
        Fingerprint::of(&CachedValue::Value(value.to_owned())).unwrap()
    }

    async fn cached(backend: &MokaBackend<String>, key: &str) -> Option<CachedValue<String>> {
        backend.get(key).await.unwrap()
    }

    #[tokio::test]
    async fn test_own_messages_are_ignored() {
        let me = ProcessIdentity::generate();
        let backend = local_backend(&me);
        backend
            .put("orders&42", CachedValue::Value("v1".to_owned()))
            .await
            .unwrap();
        let listener =
            InvalidationListener::new(vec![backend.clone() as Arc<dyn LocalInvalidatable>]);

        let report = listener
            .apply(&InvalidationMessage::evict(me.clone(), "orders&42"))
            .await;
        assert_eq!(report.skipped_self, 1);
        assert_eq!(report.evicted, 0);

        listener.apply(&InvalidationMessage::clear(me)).await;
        assert!(cached(&backend, "orders&42").await.is_some());
    }

    #[tokio::test]
    async fn test_matching_fingerprint_keeps_value() {
        let peer = ProcessIdentity::generate();
        let backend = local_backend(&ProcessIdentity::generate());
        backend
            .put("orders&42", CachedValue::Value("v1".to_owned()))
            .await
            .unwrap();
        let listener =
            InvalidationListener::new(vec![backend.clone() as Arc<dyn LocalInvalidatable>]);

        let same = InvalidationMessage::put(peer.clone(), "orders&42", Some(fingerprint("v1")));
        for _ in 0..2 {
            let report = listener.apply(&same).await;
            assert_eq!(report.unchanged, 1);
            assert_eq!(report.evicted, 0);
        }
        assert!(cached(&backend, "orders&42").await.is_some());

        let changed = InvalidationMessage::put(peer, "orders&42", Some(fingerprint("v2")));
        let report = listener.apply(&changed).await;
        assert_eq!(report.evicted, 1);
        assert!(cached(&backend, "orders&42").await.is_none());

        // Nothing left to evict
        let report = listener.apply(&changed).await;
        assert_eq!(report, ApplyReport::default());
    }

    #[tokio::test]
    async fn test_evict_and_clear_messages() {
        let peer = ProcessIdentity::generate();
        let backend = local_backend(&ProcessIdentity::generate());
        for key in ["orders&1", "orders&2"] {
            backend
                .put(key, CachedValue::Value("v".to_owned()))
                .await
                .unwrap();
        }
        let listener = InvalidationListener::new(vec![]).with_local(backend.clone());

        let report = listener
            .apply(&InvalidationMessage::evict(peer.clone(), "orders&1"))
            .await;
        assert_eq!(report.evicted, 1);
        assert!(cached(&backend, "orders&1").await.is_none());
        assert!(cached(&backend, "orders&2").await.is_some());

        let report = listener.apply(&InvalidationMessage::clear(peer)).await;
        assert_eq!(report.cleared, 1);
        assert!(cached(&backend, "orders&2").await.is_none());
    }

    #[tokio::test]
    async fn test_null_marker_is_compared_by_content() {
        let peer = ProcessIdentity::generate();
        let backend = local_backend(&ProcessIdentity::generate());
        backend.put("orders&9", CachedValue::Null).await.unwrap();
        let listener =
            InvalidationListener::new(vec![backend.clone() as Arc<dyn LocalInvalidatable>]);

        let null_fp = Fingerprint::of(&CachedValue::<String>::Null).unwrap();
        let report = listener
            .apply(&InvalidationMessage::put(peer.clone(), "orders&9", Some(null_fp)))
            .await;
        assert_eq!(report.unchanged, 1);

        let report = listener
            .apply(&InvalidationMessage::put(peer, "orders&9", Some(fingerprint("x"))))
            .await;
        assert_eq!(report.evicted, 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() {
        let backend = local_backend(&ProcessIdentity::generate());
        backend
            .put("orders&42", CachedValue::Value("v1".to_owned()))
            .await
            .unwrap();
        let listener =
            InvalidationListener::new(vec![backend.clone() as Arc<dyn LocalInvalidatable>]);

        for raw in ["garbage", r#"{"key":"orders&42"}"#] {
            assert_eq!(listener.on_message(raw).await, ApplyReport::default());
        }
        assert!(cached(&backend, "orders&42").await.is_some());

        let raw = r#"{"processIdentity":"someone-else","key":"orders&42"}"#;
        assert_eq!(listener.on_message(raw).await.evicted, 1);
    }

    #[tokio::test]
    async fn test_resync_clears_everything() {
        let backend = local_backend(&ProcessIdentity::generate());
        backend
            .put("orders&42", CachedValue::Value("v1".to_owned()))
            .await
            .unwrap();
        let listener =
            InvalidationListener::new(vec![backend.clone() as Arc<dyn LocalInvalidatable>]);
        listener.resync().await;
        assert!(cached(&backend, "orders&42").await.is_none());
    }
}
