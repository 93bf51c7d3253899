//! Cache Store Contract
//!
//! The operations every backend offers, plus the lifecycle hooks the
//! sweeper and runtime drive.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::CacheStats;
use crate::cache::CacheWrapper;
use crate::error::{CacheError, Result};

// == Cache Store Trait ==
/// Key/value store with per-entry expiry.
///
/// Keys are plain strings; the store imposes no namespacing, so callers pick
/// prefixes. Expired entries are never returned, whether or not the sweeper
/// has removed them yet.
///
/// Storage failures are logged and degrade to a safe default (miss, `false`,
/// no-op). Only a blank key is reported as an error.
#[async_trait]
pub trait CacheStore<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Returns the live wrapper for `key`, or `None` when absent, corrupt or expired.
    async fn get(&self, key: &str) -> Result<Option<CacheWrapper<T>>>;

    /// Convenience unwrap of [`CacheStore::get`].
    async fn get_value(&self, key: &str) -> Result<Option<T>> {
        Ok(self.get(key).await?.map(CacheWrapper::into_data))
    }

    /// Replaces whatever is stored under `key`.
    ///
    /// A `None` or zero `ttl` means the entry never expires. Returns `false`
    /// when the value could not be encoded or stored.
    async fn put(&self, key: &str, value: T, ttl: Option<Duration>) -> Result<bool>;

    /// Installs the value only if no live entry exists for `key`.
    ///
    /// Exactly one of any number of concurrent callers racing on a free key
    /// gets `true`. Expired entries count as absent.
    async fn put_if_absent(&self, key: &str, value: T, ttl: Option<Duration>) -> Result<bool>;

    /// Removes `key`. Missing keys are a no-op.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Best-effort snapshot of every live entry, for diagnostics.
    async fn to_map(&self) -> BTreeMap<String, T>;
}

// == Backend Trait ==
/// Lifecycle side of a store: sweeping, statistics and shutdown.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Deletes every entry whose expiry is already in the past.
    ///
    /// Returns the number of entries removed.
    async fn sweep_expired(&self) -> Result<usize>;

    fn stats(&self) -> CacheStats;

    /// Releases the underlying storage. Failures are logged, not returned.
    async fn close(&self);
}

// == Key Validation ==
/// Rejects blank keys before any storage is touched.
pub fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(CacheError::InvalidArgument(
            "cache key must not be blank".to_string(),
        ));
    }
    Ok(())
}
