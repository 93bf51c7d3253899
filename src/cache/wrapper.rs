//! Cache Wrapper Module
//!
//! Defines the expiring envelope stored under every cache key.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

// == Cache Wrapper ==
/// A cached value together with its creation and expiry instants.
///
/// The expiry instant is fixed when the wrapper is built; writing the same
/// key again replaces the whole wrapper. Serialized form:
/// `{"data": .., "createAt": <ms>, "expireAt": <ms|null>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheWrapper<T> {
    /// The cached payload
    pub data: T,
    /// Creation timestamp (Unix milliseconds)
    pub create_at: u64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    #[serde(default, deserialize_with = "deserialize_expire_at")]
    pub expire_at: Option<u64>,
}

impl<T> CacheWrapper<T> {
    // == Constructor ==
    /// Builds a wrapper created at `now_ms`.
    ///
    /// A `None` or zero TTL produces a wrapper that never expires.
    pub fn new(data: T, now_ms: u64, ttl: Option<Duration>) -> Self {
        let expire_at = ttl
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| now_ms.saturating_add(ttl.as_millis() as u64));

        Self {
            data,
            create_at: now_ms,
            expire_at,
        }
    }

    // == Is Expired ==
    /// Checks whether the wrapper is expired at `now_ms`.
    ///
    /// Boundary condition: the entry is expired once `now_ms >= expire_at`,
    /// so an entry with TTL `d` is gone exactly at `create_at + d`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        is_expired(self.expire_at, now_ms)
    }

    /// Remaining lifetime in milliseconds, `None` if the entry never expires.
    pub fn ttl_remaining_ms(&self, now_ms: u64) -> Option<u64> {
        self.expire_at
            .map(|expires| expires.saturating_sub(now_ms))
    }

    pub fn into_data(self) -> T {
        self.data
    }
}

/// Shared expiry rule for wrappers and raw stored payloads.
pub(crate) fn is_expired(expire_at: Option<u64>, now_ms: u64) -> bool {
    match expire_at {
        Some(expires) => now_ms >= expires,
        None => false,
    }
}

// `null` and `0` both mean "never expires".
fn deserialize_expire_at<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<u64>::deserialize(deserializer)?;
    Ok(raw.filter(|ms| *ms != 0))
}

// == Expiry Probe ==
/// Reads only the expiry of a stored payload, whatever its `data` type.
///
/// Used where liveness matters but the payload does not: the sweeper and
/// the persistent backend's put-if-absent check.
#[derive(Debug, Deserialize)]
pub(crate) struct ExpiryProbe {
    #[serde(rename = "expireAt", default, deserialize_with = "deserialize_expire_at")]
    pub expire_at: Option<u64>,
}

impl ExpiryProbe {
    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}
