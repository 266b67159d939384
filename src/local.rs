//! Process identity and change fanout for local (in-process) backends

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::{debug, warn};

use crate::{CacheError, Fingerprint, InvalidationMessage, InvalidationProvider};

/// Opaque identity of the running process.
///
/// Generate it once at startup and hand the same value to every local
/// backend; peers use it to recognise and discard their own broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessIdentity(String);

impl ProcessIdentity {
    /// A fresh random identity
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Listener-facing capability of a local backend.
///
/// `invalidate` and `invalidate_all` apply a peer's change and must not
/// fan out again.
#[async_trait]
pub trait LocalInvalidatable: Send + Sync {
    fn identity(&self) -> &ProcessIdentity;

    /// Fingerprint of the value currently cached at `key`, if any
    async fn fingerprint(&self, key: &str) -> Result<Option<Fingerprint>, CacheError>;

    async fn invalidate(&self, key: &str);

    async fn invalidate_all(&self);
}

/// Announces mutations of a local backend to the other processes.
///
/// Composed into each local backend, which calls the matching hook right
/// after applying a mutation. Without a provider every hook is a no-op.
#[derive(Clone)]
pub struct Fanout {
    identity: ProcessIdentity,
    provider: Option<Arc<dyn InvalidationProvider>>,
}

impl Fanout {
    pub fn new(identity: ProcessIdentity, provider: Option<Arc<dyn InvalidationProvider>>) -> Self {
        Self { identity, provider }
    }

    /// Fanout for single-process deployments
    pub fn disabled(identity: ProcessIdentity) -> Self {
        Self::new(identity, None)
    }

    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub fn fanout_clear(&self) {
        if self.is_enabled() {
            self.emit(InvalidationMessage::clear(self.identity.clone()));
        }
    }

    pub fn fanout_evict(&self, key: &str) {
        if self.is_enabled() {
            self.emit(InvalidationMessage::evict(self.identity.clone(), key));
        }
    }

    pub fn fanout_put<V: Serialize + ?Sized>(&self, key: &str, value: &V) {
        if !self.is_enabled() {
            return;
        }
        // Without a fingerprint peers evict unconditionally, which is safe.
        let fingerprint = match Fingerprint::of(value) {
            Ok(fp) => Some(fp),
            Err(e) => {
                warn!(key, error = %e, "Could not fingerprint cached value");
                None
            }
        };
        self.emit(InvalidationMessage::put(
            self.identity.clone(),
            key,
            fingerprint,
        ));
    }

    /// Publish in the background so the caller never waits on the transport.
    fn emit(&self, message: InvalidationMessage) {
        let Some(provider) = self.provider.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                key = message.key.as_deref(),
                "No tokio runtime available, invalidation not published"
            );
            return;
        };
        runtime.spawn(async move {
            match provider.publish(&message).await {
                Ok(()) => debug!(key = message.key.as_deref(), "Invalidation fanned out"),
                Err(e) => warn!(
                    key = message.key.as_deref(),
                    error = %e,
                    "Failed to publish invalidation"
                ),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheBackend, CachedValue, LocalCacheConfig, MokaBackend};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct ChannelProvider(mpsc::UnboundedSender<InvalidationMessage>);

    #[async_trait]
    impl InvalidationProvider for ChannelProvider {
        async fn publish(&self, message: &InvalidationMessage) -> Result<(), CacheError> {
            let _ = self.0.send(message.clone());
            Ok(())
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<InvalidationMessage>) -> InvalidationMessage {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("fanout message")
            .expect("channel open")
    }

    #[test]
    fn test_generated_identities_are_unique() {
        let a = ProcessIdentity::generate();
        let b = ProcessIdentity::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert_eq!(a.to_string(), a.as_str());
    }

    #[tokio::test]
    async fn test_backend_mutations_fan_out() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let identity = ProcessIdentity::generate();
        let fanout = Fanout::new(identity.clone(), Some(Arc::new(ChannelProvider(tx))));
        let backend: MokaBackend<u32> =
            MokaBackend::new("local", &LocalCacheConfig::default(), fanout);

        let value = CachedValue::Value(7_u32);
        backend.put("line&k", value.clone()).await.unwrap();
        let msg = next(&mut rx).await;
        assert_eq!(msg.process_identity, identity);
        assert_eq!(msg.key.as_deref(), Some("line&k"));
        assert_eq!(msg.content_fingerprint, Some(Fingerprint::of(&value).unwrap()));

        backend.evict("line&k").await.unwrap();
        let msg = next(&mut rx).await;
        assert_eq!(msg, InvalidationMessage::evict(identity.clone(), "line&k"));

        backend.clear().await.unwrap();
        let msg = next(&mut rx).await;
        assert_eq!(msg, InvalidationMessage::clear(identity));
    }

    #[tokio::test]
    async fn test_peer_invalidation_does_not_fan_out() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fanout = Fanout::new(
            ProcessIdentity::generate(),
            Some(Arc::new(ChannelProvider(tx))),
        );
        let backend: MokaBackend<u32> =
            MokaBackend::new("local", &LocalCacheConfig::default(), fanout);

        backend.invalidate("line&k").await;
        backend.invalidate_all().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disabled_fanout_is_silent() {
        let fanout = Fanout::disabled(ProcessIdentity::generate());
        assert!(!fanout.is_enabled());
        fanout.fanout_put("line&k", &1);
        fanout.fanout_evict("line&k");
        fanout.fanout_clear();
    }
}
