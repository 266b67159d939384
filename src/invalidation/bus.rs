//! In-process broadcast transport
//!
//! Useful when several cache "processes" share one address space (embedded
//! fleets, tests). Messages go through the same wire encoding as Redis.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{InvalidationListener, InvalidationMessage, InvalidationProvider};
use crate::CacheError;

#[derive(Clone)]
pub struct BroadcastBus {
    tx: broadcast::Sender<String>,
}

impl BroadcastBus {
    /// `capacity` is the number of messages a slow listener may fall behind.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Feed every message on the bus to `listener` until the bus is dropped.
    ///
    /// A listener that falls too far behind has its local caches cleared,
    /// since the messages it missed can no longer be applied.
    pub fn attach(&self, listener: Arc<InvalidationListener>) -> JoinHandle<()> {
        let mut rx = self.tx.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => {
                        listener.on_message(&payload).await;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Invalidation listener lagged, clearing local caches");
                        listener.resync().await;
                    }
                    Err(RecvError::Closed) => {
                        debug!("Invalidation bus closed");
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl InvalidationProvider for BroadcastBus {
    async fn publish(&self, message: &InvalidationMessage) -> Result<(), CacheError> {
        let payload = message.to_wire()?;
        if self.tx.send(payload).is_err() {
            debug!("No listeners attached to invalidation bus");
        }
        Ok(())
    }
}
