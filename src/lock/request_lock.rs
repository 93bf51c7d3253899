//! Request Lock
//!
//! At-most-one in-flight execution per request fingerprint, built on the
//! cache store's `put_if_absent`.
//!
//! # Example
//! ```ignore
//! let spec = LockSpec::new("PostService::like")
//!     .ttl(Duration::from_secs(600))
//!     .auto_release(true)
//!     .keyed_on([0]);
//!
//! lock.run(&spec, &[json!(post_id), json!(user_id)], || async {
//!     posts.increment_likes(post_id).await
//! })
//! .await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::cache::CacheStore;
use crate::error::{CacheError, Result};
use crate::lock::guard::PendingClaim;
use crate::lock::LockGuard;

/// Prefix that keeps lock fingerprints apart from ordinary cache keys.
pub const LOCK_KEY_PREFIX: &str = "request-lock:";

// == Lock Spec ==
/// How one kind of operation is locked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSpec {
    method: String,
    ttl: Option<Duration>,
    auto_release: bool,
    keyed_args: Option<Vec<usize>>,
}

impl LockSpec {
    /// Lock for `method`, keyed on every argument, auto-released, using
    /// the lock's default TTL.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ttl: None,
            auto_release: true,
            keyed_args: None,
        }
    }

    /// How long the key lives if never released. Must be non-zero.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// `false` keeps the key until its TTL expires, enforcing a cooldown.
    pub fn auto_release(mut self, auto_release: bool) -> Self {
        self.auto_release = auto_release;
        self
    }

    /// Only the arguments at these positions take part in the fingerprint.
    pub fn keyed_on(mut self, positions: impl IntoIterator<Item = usize>) -> Self {
        let mut positions: Vec<usize> = positions.into_iter().collect();
        positions.sort_unstable();
        positions.dedup();
        self.keyed_args = Some(positions);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Builds the fingerprint for one call.
    ///
    /// The encoding is the method name followed by the JSON array of the
    /// selected arguments. `serde_json` orders object keys, so equal
    /// arguments always encode identically.
    pub fn fingerprint(&self, args: &[Value]) -> Result<String> {
        let selected: Vec<&Value> = match &self.keyed_args {
            None => args.iter().collect(),
            Some(positions) => positions
                .iter()
                .map(|&i| {
                    args.get(i).ok_or_else(|| {
                        CacheError::InvalidArgument(format!(
                            "lock for {} is keyed on argument {} but only {} were given",
                            self.method,
                            i,
                            args.len()
                        ))
                    })
                })
                .collect::<Result<_>>()?,
        };

        Ok(format!(
            "{}{}:{}",
            LOCK_KEY_PREFIX,
            self.method,
            serde_json::to_string(&selected)?
        ))
    }
}

// == Request Lock ==
/// Rejects duplicate concurrent (or too-soon) executions of the same request.
#[derive(Clone)]
pub struct RequestLock {
    store: Arc<dyn CacheStore<String>>,
    default_ttl: Duration,
    timeout: Duration,
}

impl RequestLock {
    /// # Arguments
    /// * `store` - Shared cache store holding the lock keys
    /// * `default_ttl` - TTL for a [`LockSpec`] that sets none
    /// * `timeout` - Upper bound on each store call made by the lock
    pub fn new(store: Arc<dyn CacheStore<String>>, default_ttl: Duration, timeout: Duration) -> Self {
        Self {
            store,
            default_ttl,
            timeout,
        }
    }

    /// Claims the fingerprint for this call.
    ///
    /// Returns [`CacheError::Conflict`] when another call holds it, and
    /// [`CacheError::Timeout`] when the store does not answer in time. A
    /// claim that lands after its timeout is deleted again, so a timed out
    /// call never leaves the key held.
    pub async fn acquire(&self, spec: &LockSpec, args: &[Value]) -> Result<LockGuard> {
        let key = spec.fingerprint(args)?;
        let ttl = spec.ttl.unwrap_or(self.default_ttl);
        // A zero TTL would store a key that never expires.
        if ttl.is_zero() {
            return Err(CacheError::InvalidArgument(format!(
                "lock for {} needs a non-zero TTL",
                spec.method
            )));
        }

        let claimed = PendingClaim::start(Arc::clone(&self.store), key.clone(), ttl, self.timeout)
            .settle()
            .await?;

        if !claimed {
            info!(key = %key, "duplicate request rejected");
            return Err(CacheError::Conflict(key));
        }

        debug!(key = %key, ttl_secs = ttl.as_secs(), "request lock acquired");
        Ok(LockGuard::new(
            Arc::clone(&self.store),
            key,
            spec.auto_release,
            self.timeout,
        ))
    }

    /// Runs `op` while holding the lock for this call.
    ///
    /// `op` is not started when the lock is taken; the caller gets the
    /// `Conflict` converted into its own error type. With auto-release on,
    /// the key is deleted however `op` ends, including a panic or the
    /// returned future being dropped.
    pub async fn run<F, Fut, R, E>(&self, spec: &LockSpec, args: &[Value], op: F) -> std::result::Result<R, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        E: From<CacheError>,
    {
        let guard = self.acquire(spec, args).await?;
        let outcome = op().await;
        guard.release().await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ManualClock, MemoryStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn lock_with_clock() -> (RequestLock, Arc<MemoryStore<String>>, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let store = Arc::new(MemoryStore::<String>::with_clock(Arc::new(clock.clone())));
        let lock = RequestLock::new(store.clone(), Duration::from_secs(600), Duration::from_millis(500));
        (lock, store, clock)
    }

    #[test]
    fn test_fingerprint_uses_keyed_args_only() {
        let spec = LockSpec::new("PostService::like").keyed_on([0]);

        let a = spec.fingerprint(&[json!(42), json!("alice")]).unwrap();
        let b = spec.fingerprint(&[json!(42), json!("bob")]).unwrap();
        let c = spec.fingerprint(&[json!(43), json!("alice")]).unwrap();

        assert_eq!(a, "request-lock:PostService::like:[42]");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_fingerprint_defaults_to_all_args() {
        let spec = LockSpec::new("CommentService::create");
        let key = spec
            .fingerprint(&[json!(7), json!({"body": "hi", "author": 1})])
            .unwrap();
        assert_eq!(key, r#"request-lock:CommentService::create:[7,{"author":1,"body":"hi"}]"#);
    }

    #[test]
    fn test_fingerprint_distinguishes_methods() {
        let args = [json!(1)];
        let like = LockSpec::new("like").fingerprint(&args).unwrap();
        let unlike = LockSpec::new("unlike").fingerprint(&args).unwrap();
        assert_ne!(like, unlike);
    }

    #[test]
    fn test_fingerprint_rejects_missing_position() {
        let spec = LockSpec::new("like").keyed_on([2]);
        assert!(matches!(
            spec.fingerprint(&[json!(1)]),
            Err(CacheError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_cooldown_without_auto_release() {
        let (lock, _store, clock) = lock_with_clock();
        let spec = LockSpec::new("like")
            .auto_release(false)
            .ttl(Duration::from_secs(600));
        let runs = AtomicUsize::new(0);
        let args = [json!(42)];

        let first: Result<()> = lock
            .run(&spec, &args, || async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(first.is_ok());

        clock.advance(Duration::from_secs(599));
        let second: Result<()> = lock
            .run(&spec, &args, || async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(second, Err(CacheError::Conflict(_))));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        let third: Result<()> = lock.run(&spec, &args, || async { Ok(()) }).await;
        assert!(third.is_ok(), "lock expires with its TTL");
    }

    #[tokio::test]
    async fn test_auto_release_after_failure() {
        let (lock, store, _clock) = lock_with_clock();
        let spec = LockSpec::new("comment");
        let args = [json!("post-1")];

        let failed: Result<()> = lock
            .run(&spec, &args, || async {
                Err(CacheError::InvalidArgument("empty comment".into()))
            })
            .await;
        assert!(matches!(failed, Err(CacheError::InvalidArgument(_))));

        let key = spec.fingerprint(&args).unwrap();
        assert!(store.get(&key).await.unwrap().is_none(), "released after failure");

        let retried: Result<u32> = lock.run(&spec, &args, || async { Ok(1) }).await;
        assert_eq!(retried.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lock_value_is_fingerprint() {
        let (lock, store, _clock) = lock_with_clock();
        let spec = LockSpec::new("like").auto_release(false);

        let guard = lock.acquire(&spec, &[json!(9)]).await.unwrap();
        let stored = store.get(guard.key()).await.unwrap().unwrap();

        assert_eq!(stored.data, guard.key());
        assert_eq!(stored.expire_at, Some(1_000_000 + 600_000), "default TTL applies");
        guard.release().await;
        assert!(store.get(&stored.data).await.unwrap().is_some(), "no auto-release");
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_key() {
        let (lock, store, _clock) = lock_with_clock();
        let spec = LockSpec::new("like");

        let guard = lock.acquire(&spec, &[json!(1)]).await.unwrap();
        let key = guard.key().to_string();
        drop(guard);

        for _ in 0..50 {
            if store.get(&key).await.unwrap().is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("dropped guard never released {}", key);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_rejected() {
        let (lock, store, _clock) = lock_with_clock();
        let spec = LockSpec::new("like").auto_release(false).ttl(Duration::ZERO);

        let outcome = lock.acquire(&spec, &[json!(3)]).await;
        assert!(matches!(outcome, Err(CacheError::InvalidArgument(_))));
        assert!(store.is_empty().await, "nothing stored for a rejected lock");

        let no_default = RequestLock::new(store.clone(), Duration::ZERO, Duration::from_millis(500));
        assert!(matches!(
            no_default.acquire(&LockSpec::new("like"), &[json!(3)]).await,
            Err(CacheError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_anyhow_error_receives_conflict() {
        let (lock, _store, _clock) = lock_with_clock();
        let spec = LockSpec::new("like").auto_release(false);
        let args = [json!(5)];

        let _held = lock.acquire(&spec, &args).await.unwrap();
        let outcome: anyhow::Result<()> = lock.run(&spec, &args, || async { Ok(()) }).await;

        let err = outcome.unwrap_err();
        assert!(err.downcast_ref::<CacheError>().is_some_and(CacheError::is_conflict));
    }
}
