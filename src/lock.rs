//! Per-key mutual exclusion with automatic lock lifecycle
//!
//! [`LockManager`] maps a key to a lock entry that is created on first use
//! and dropped again as soon as nobody holds or waits for it, so idle keys
//! cost nothing. Two access modes are provided:
//!
//! - **spin**: wait until the key is free, then run the action
//! - **skip**: run the action only if the key is free right now
//!
//! Actions are fail-open: an `Err` or a panic is logged and turned into
//! `None`. The lock is released on every exit path.

use dashmap::DashMap;
use futures::FutureExt;
use std::{
    any::Any,
    fmt::Display,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, warn};

struct LockEntry {
    mutex: Arc<Mutex<()>>,
    /// Tasks holding or waiting for `mutex`
    users: AtomicUsize,
}

impl LockEntry {
    fn new() -> Self {
        Self {
            mutex: Arc::new(Mutex::new(())),
            users: AtomicUsize::new(0),
        }
    }
}

/// Outcome of [`LockManager::skip_sync`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipOutcome<T> {
    /// The key was free and the action ran; `None` if it failed
    Ran(Option<T>),
    /// The key was contended and the action did not run
    Skipped,
}

/// Process-local per-key lock registry
#[derive(Default)]
pub struct LockManager {
    entries: DashMap<String, Arc<LockEntry>>,
}

/// A registered interest in a lock entry; deregisters on drop.
struct Checkout<'a> {
    manager: &'a LockManager,
    key: String,
    entry: Arc<LockEntry>,
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        self.manager.checkin(&self.key, &self.entry);
    }
}

/// Exclusive hold on a key. Released when dropped.
pub struct KeyGuard<'a> {
    // Field order matters: unlock before deregistering.
    _guard: OwnedMutexGuard<()>,
    checkout: Checkout<'a>,
}

impl KeyGuard<'_> {
    pub fn key(&self) -> &str {
        &self.checkout.key
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys that currently have a lock entry
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True while some task holds or waits for `key`
    pub fn is_locked(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Fetch or create the entry for `key` and count the caller as a user.
    ///
    /// The count is bumped while the shard is locked, so it can never race
    /// with the conditional removal in [`Self::checkin`].
    fn checkout(&self, key: &str) -> Checkout<'_> {
        let entry = {
            let slot = self
                .entries
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(LockEntry::new()));
            slot.users.fetch_add(1, Ordering::SeqCst);
            Arc::clone(slot.value())
        };
        Checkout {
            manager: self,
            key: key.to_owned(),
            entry,
        }
    }

    fn checkin(&self, key: &str, entry: &Arc<LockEntry>) {
        if entry.users.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.entries.remove_if(key, |_, current| {
                Arc::ptr_eq(current, entry) && current.users.load(Ordering::SeqCst) == 0
            });
        }
    }

    /// The entry we acquired is only valid if the map still lists it.
    fn is_current(&self, key: &str, entry: &Arc<LockEntry>) -> bool {
        self.entries
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current.value(), entry))
    }

    /// Wait until `key` is free and take it.
    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        loop {
            let checkout = self.checkout(key);
            let guard = Arc::clone(&checkout.entry.mutex).lock_owned().await;
            if self.is_current(key, &checkout.entry) {
                return KeyGuard {
                    _guard: guard,
                    checkout,
                };
            }
            debug!(key, "lock entry was replaced while acquiring, retrying");
        }
    }

    /// Take `key` if nobody else holds it, without waiting.
    pub fn try_lock(&self, key: &str) -> Option<KeyGuard<'_>> {
        loop {
            let checkout = self.checkout(key);
            let guard = Arc::clone(&checkout.entry.mutex).try_lock_owned().ok()?;
            if self.is_current(key, &checkout.entry) {
                return Some(KeyGuard {
                    _guard: guard,
                    checkout,
                });
            }
            debug!(key, "lock entry was replaced while acquiring, retrying");
        }
    }

    /// Run `action` exclusively for `key`, waiting for the key if needed.
    ///
    /// Every caller eventually runs its action. Returns `None` if the action
    /// failed or panicked.
    pub async fn spin_sync<F, Fut, T, E>(&self, key: &str, action: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let _guard = self.lock(key).await;
        run_fail_open(key, action).await
    }

    /// [`Self::spin_sync`] for actions without a result.
    pub async fn spin_run<F, Fut, E>(&self, key: &str, action: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        self.spin_sync(key, action).await;
    }

    /// Run `action` exclusively for `key` only if the key is free right now.
    pub async fn skip_sync<F, Fut, T, E>(&self, key: &str, action: F) -> SkipOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let Some(_guard) = self.try_lock(key) else {
            debug!(key, "key is contended, skipping action");
            return SkipOutcome::Skipped;
        };
        SkipOutcome::Ran(run_fail_open(key, action).await)
    }

    /// [`Self::skip_sync`] for actions without a result; true if it ran.
    pub async fn skip_run<F, Fut, E>(&self, key: &str, action: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        matches!(self.skip_sync(key, action).await, SkipOutcome::Ran(_))
    }
}

/// Call `action` and await its future, logging and swallowing both errors
/// and panics. Panics raised before the future exists are caught too.
pub(crate) async fn run_fail_open<F, Fut, T, E>(key: &str, action: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    match AssertUnwindSafe(async move { action().await })
        .catch_unwind()
        .await
    {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(key, error = %e, "action failed, treating as no value");
            None
        }
        Err(payload) => {
            error!(
                key,
                panic = panic_message(&*payload),
                "action panicked, treating as no value"
            );
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
