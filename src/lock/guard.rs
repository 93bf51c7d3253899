//! Lock Guard
//!
//! Scoped ownership of a request lock key.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::error::{CacheError, Result};

// == Lock Guard ==
/// Holds a request lock key until released or dropped.
///
/// With auto-release on, the key is deleted on every exit path:
/// [`LockGuard::release`] deletes it inline, and dropping an unreleased
/// guard (a panic in the wrapped operation, or its future being cancelled)
/// schedules the delete on the current tokio runtime. With auto-release
/// off the key is left to expire with its TTL.
#[must_use = "dropping the guard immediately releases an auto-release lock"]
pub struct LockGuard {
    store: Arc<dyn CacheStore<String>>,
    key: String,
    auto_release: bool,
    timeout: Duration,
    released: bool,
}

impl LockGuard {
    pub(crate) fn new(
        store: Arc<dyn CacheStore<String>>,
        key: String,
        auto_release: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            key,
            auto_release,
            timeout,
            released: false,
        }
    }

    /// The fingerprint this guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn auto_release(&self) -> bool {
        self.auto_release
    }

    /// Ends the guarded section.
    ///
    /// Deletes the key when auto-release is on. A failed or timed out
    /// delete is logged; the key then lingers until its TTL.
    pub async fn release(mut self) {
        if self.auto_release {
            delete_key(Arc::clone(&self.store), self.key.clone(), self.timeout).await;
        }
        // Only now: a release cut short still leaves the delete to `Drop`.
        self.released = true;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released || !self.auto_release {
            return;
        }

        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(key = %key, "lock guard dropped unreleased, scheduling release");
                handle.spawn(delete_key(store, key, self.timeout));
            }
            Err(_) => warn!(
                key = %key,
                "lock guard dropped outside a tokio runtime, key held until TTL"
            ),
        }
    }
}

// == Pending Claim ==
/// A lock write that has been started but not yet answered.
///
/// The write runs on its own task, so it can land after the caller has
/// stopped waiting. Until [`PendingClaim::settle`] hands back the answer,
/// dropping the claim (timeout or cancellation) leaves a cleanup task
/// that deletes the key if the write turns out to have won.
pub(crate) struct PendingClaim {
    store: Arc<dyn CacheStore<String>>,
    key: String,
    timeout: Duration,
    write: Option<JoinHandle<Result<bool>>>,
}

impl PendingClaim {
    pub(crate) fn start(
        store: Arc<dyn CacheStore<String>>,
        key: String,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        let write = tokio::spawn({
            let store = Arc::clone(&store);
            let key = key.clone();
            async move { store.put_if_absent(&key, key.clone(), Some(ttl)).await }
        });

        Self {
            store,
            key,
            timeout,
            write: Some(write),
        }
    }

    /// Waits at most the boundary timeout for the write's answer.
    pub(crate) async fn settle(mut self) -> Result<bool> {
        let Some(write) = self.write.as_mut() else {
            return Ok(false);
        };

        match tokio::time::timeout(self.timeout, write).await {
            Ok(joined) => {
                self.write = None;
                joined.map_err(|e| {
                    CacheError::BackendUnavailable(format!("claiming {}: {}", self.key, e))
                })?
            }
            Err(_) => Err(CacheError::Timeout(format!("acquiring {}", self.key))),
        }
    }
}

impl Drop for PendingClaim {
    fn drop(&mut self) {
        let Some(write) = self.write.take() else {
            return;
        };

        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let timeout = self.timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Ok(Ok(true)) = write.await {
                        debug!(key = %key, "abandoned lock claim landed late, releasing");
                        delete_key(store, key, timeout).await;
                    }
                });
            }
            Err(_) => warn!(
                key = %key,
                "lock claim abandoned outside a tokio runtime, key may be held until TTL"
            ),
        }
    }
}

async fn delete_key(store: Arc<dyn CacheStore<String>>, key: String, timeout: Duration) {
    match tokio::time::timeout(timeout, store.delete(&key)).await {
        Ok(Ok(())) => debug!(key = %key, "request lock released"),
        Ok(Err(e)) => warn!(key = %key, error = %e, "request lock release failed"),
        Err(_) => warn!(key = %key, "request lock release timed out"),
    }
}
