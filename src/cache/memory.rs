//! In-Memory Backend
//!
//! Process-local ordered map behind a single read/write lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::cache::clock::{system_clock, Clock};
use crate::cache::store::{validate_key, Backend, CacheStore};
use crate::cache::{CacheStats, CacheWrapper, StatsRecorder};
use crate::error::Result;

// == Memory Store ==
/// In-memory cache store.
///
/// Reads share the lock; `put`, `put_if_absent`, `delete` and sweeps take it
/// exclusively, which makes `put_if_absent` linearizable against every other
/// write on the same key.
#[derive(Debug)]
pub struct MemoryStore<T> {
    entries: RwLock<BTreeMap<String, CacheWrapper<T>>>,
    clock: Arc<dyn Clock>,
    stats: StatsRecorder,
}

impl<T> MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            clock,
            stats: StatsRecorder::new(),
        }
    }

    /// Number of physically stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl<T> Default for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> CacheStore<T> for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<CacheWrapper<T>>> {
        validate_key(key)?;
        let now = self.clock.now_ms();
        let entries = self.entries.read().await;

        match entries.get(key) {
            // Left in place; the sweeper removes it.
            Some(wrapper) if wrapper.is_expired_at(now) => {
                self.stats.record_expired_read();
                Ok(None)
            }
            Some(wrapper) => {
                self.stats.record_hit();
                Ok(Some(wrapper.clone()))
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, value: T, ttl: Option<Duration>) -> Result<bool> {
        validate_key(key)?;
        let wrapper = CacheWrapper::new(value, self.clock.now_ms(), ttl);
        self.entries.write().await.insert(key.to_string(), wrapper);
        self.stats.record_write();
        Ok(true)
    }

    async fn put_if_absent(&self, key: &str, value: T, ttl: Option<Duration>) -> Result<bool> {
        validate_key(key)?;
        let mut entries = self.entries.write().await;
        let now = self.clock.now_ms();

        let occupied = entries
            .get(key)
            .is_some_and(|existing| !existing.is_expired_at(now));
        if occupied {
            self.stats.record_rejected_write();
            return Ok(false);
        }

        entries.insert(key.to_string(), CacheWrapper::new(value, now, ttl));
        self.stats.record_write();
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn to_map(&self) -> BTreeMap<String, T> {
        let now = self.clock.now_ms();
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, wrapper)| !wrapper.is_expired_at(now))
            .map(|(key, wrapper)| (key.clone(), wrapper.data.clone()))
            .collect()
    }
}

#[async_trait]
impl<T> Backend for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn sweep_expired(&self) -> Result<usize> {
        let started_at = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        let before = entries.len();

        // Only entries already expired when the pass started are removed.
        entries.retain(|_, wrapper| match wrapper.expire_at {
            Some(expires) => expires >= started_at,
            None => true,
        });

        let removed = before - entries.len();
        self.stats.record_swept(removed);
        debug!(removed, remaining = entries.len(), "memory sweep finished");
        Ok(removed)
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    async fn close(&self) {
        let mut entries = self.entries.write().await;
        let dropped = entries.len();
        entries.clear();
        info!(dropped, "memory cache store closed");
    }
}
