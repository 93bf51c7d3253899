//! SQLite Backend
//!
//! Durable store kept in a single SQLite file in WAL (write-ahead log) mode.
//! Each row holds one key and the JSON encoding of its [`CacheWrapper`].
//!
//! # Consistency
//! SQLite has no single-statement compare-and-set that understands our
//! expiry field, so `put_if_absent` is a read, a liveness check and a write.
//! It is atomic only because all three run inside one IMMEDIATE transaction
//! while holding the process-wide connection mutex. Every typed view of the
//! store shares that one mutex. Code that reaches the database file through
//! any other connection gets no such guarantee.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::clock::Clock;
use crate::cache::store::{validate_key, Backend, CacheStore};
use crate::cache::wrapper::{is_expired, ExpiryProbe};
use crate::cache::{CacheStats, CacheWrapper, StatsRecorder};
use crate::error::{CacheError, Result};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
) WITHOUT ROWID";

const SELECT_VALUE: &str = "SELECT value FROM cache_entries WHERE key = ?1";
const SELECT_ALL: &str = "SELECT key, value FROM cache_entries";
const UPSERT: &str = "INSERT OR REPLACE INTO cache_entries (key, value) VALUES (?1, ?2)";
const DELETE: &str = "DELETE FROM cache_entries WHERE key = ?1";

/// How long a statement waits on a locked database file before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

// == Shared Handle ==
/// The single connection plus everything typed views share.
#[derive(Debug)]
struct SqliteHandle {
    conn: Mutex<Option<Connection>>,
    path: PathBuf,
    clock: Arc<dyn Clock>,
    stats: StatsRecorder,
}

impl SqliteHandle {
    fn lock(&self, op: &'static str) -> MutexGuard<'_, Option<Connection>> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    op,
                    lock_kind = "mutex.lock",
                    result = "poisoned_recovered",
                    "Recovered from poisoned sqlite connection lock"
                );
                poisoned.into_inner()
            }
        }
    }

    fn with_conn<R>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut Connection) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self.lock(op);
        let conn = guard.as_mut().ok_or_else(|| {
            CacheError::BackendUnavailable(format!("{} on closed store {}", op, self.path.display()))
        })?;
        f(conn)
    }

    fn close(&self) {
        let Some(conn) = self.lock("close").take() else {
            debug!(path = %self.path.display(), "sqlite cache store already closed");
            return;
        };
        match conn.close() {
            Ok(()) => info!(path = %self.path.display(), "sqlite cache store closed"),
            Err((_, e)) => warn!(
                path = %self.path.display(),
                error = %e,
                "sqlite cache store did not close cleanly"
            ),
        }
    }
}

// == Sqlite Store ==
/// Persistent cache store over one shared SQLite connection.
///
/// Cloning, or calling [`SqliteStore::typed`], yields another view of the
/// same connection. Reading a key through a view whose `T` does not match
/// what was written is a decode failure and therefore a miss.
#[derive(Debug)]
pub struct SqliteStore<T> {
    handle: Arc<SqliteHandle>,
    _value: PhantomData<fn() -> T>,
}

impl<T> Clone for SqliteStore<T> {
    fn clone(&self) -> Self {
        self.typed()
    }
}

impl<T> SqliteStore<T> {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// Any failure here is fatal for the caller: it is reported as
    /// [`CacheError::BackendUnavailable`].
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let unavailable =
            |e: &dyn std::fmt::Display| CacheError::BackendUnavailable(format!("{}: {}", path.display(), e));

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| unavailable(&e))?;
        }

        let conn = Connection::open(&path).map_err(|e| unavailable(&e))?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(|e| unavailable(&e))?;
        let journal_mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|e| unavailable(&e))?;
        conn.execute_batch(SCHEMA).map_err(|e| unavailable(&e))?;

        info!(path = %path.display(), journal_mode = %journal_mode, "sqlite cache store opened");

        Ok(Self {
            handle: Arc::new(SqliteHandle {
                conn: Mutex::new(Some(conn)),
                path,
                clock,
                stats: StatsRecorder::new(),
            }),
            _value: PhantomData,
        })
    }

    /// Another view of the same database for values of type `U`.
    pub fn typed<U>(&self) -> SqliteStore<U> {
        SqliteStore {
            handle: Arc::clone(&self.handle),
            _value: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.handle.path
    }

    fn now_ms(&self) -> u64 {
        self.handle.clock.now_ms()
    }

    fn recorder(&self) -> &StatsRecorder {
        &self.handle.stats
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn run_blocking<R, F>(&self, op: &'static str, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
    {
        let handle = Arc::clone(&self.handle);
        tokio::task::spawn_blocking(move || handle.with_conn(op, f))
            .await
            .map_err(|e| CacheError::BackendUnavailable(format!("{} task failed: {}", op, e)))?
    }

    async fn load_all(&self) -> Result<Vec<(String, String)>> {
        self.run_blocking("to_map", |conn| {
            let mut stmt = conn.prepare(SELECT_ALL)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    #[cfg(test)]
    pub(crate) async fn put_raw(&self, key: &str, raw: &str) -> Result<()> {
        let (key, raw) = (key.to_string(), raw.to_string());
        self.run_blocking("put_raw", move |conn| {
            conn.execute(UPSERT, params![key, raw])?;
            Ok(())
        })
        .await
    }

    #[cfg(test)]
    pub(crate) async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.run_blocking("get_raw", move |conn| {
            Ok(conn
                .query_row(SELECT_VALUE, params![key], |row| row.get(0))
                .optional()?)
        })
        .await
    }
}

impl<T> SqliteStore<T>
where
    T: Serialize,
{
    fn encode(&self, key: &str, wrapper: &CacheWrapper<T>) -> Option<String> {
        match serde_json::to_string(wrapper) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                warn!(key, error = %e, "failed to encode cache value, write skipped");
                self.recorder().record_rejected_write();
                None
            }
        }
    }
}

#[async_trait]
impl<T> CacheStore<T> for SqliteStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<CacheWrapper<T>>> {
        validate_key(key)?;
        let owned = key.to_string();
        let raw = self
            .run_blocking("get", move |conn| {
                Ok(conn
                    .query_row(SELECT_VALUE, params![owned], |row| row.get::<_, String>(0))
                    .optional()?)
            })
            .await;

        let raw = match raw {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.recorder().record_miss();
                return Ok(None);
            }
            Err(e) => {
                warn!(key, error = %e, "cache read failed, treating as miss");
                self.recorder().record_miss();
                return Ok(None);
            }
        };

        let wrapper: CacheWrapper<T> = match serde_json::from_str(&raw) {
            Ok(wrapper) => wrapper,
            Err(e) => {
                warn!(key, error = %e, "corrupt cache entry, treating as miss");
                self.recorder().record_miss();
                return Ok(None);
            }
        };

        if wrapper.is_expired_at(self.now_ms()) {
            self.recorder().record_expired_read();
            return Ok(None);
        }

        self.recorder().record_hit();
        Ok(Some(wrapper))
    }

    async fn put(&self, key: &str, value: T, ttl: Option<Duration>) -> Result<bool> {
        validate_key(key)?;
        let wrapper = CacheWrapper::new(value, self.now_ms(), ttl);
        let Some(encoded) = self.encode(key, &wrapper) else {
            return Ok(false);
        };

        let owned = key.to_string();
        let stored = self
            .run_blocking("put", move |conn| {
                conn.execute(UPSERT, params![owned, encoded])?;
                Ok(())
            })
            .await;

        match stored {
            Ok(()) => {
                self.recorder().record_write();
                Ok(true)
            }
            Err(e) => {
                warn!(key, error = %e, "cache write failed");
                self.recorder().record_rejected_write();
                Ok(false)
            }
        }
    }

    async fn put_if_absent(&self, key: &str, value: T, ttl: Option<Duration>) -> Result<bool> {
        validate_key(key)?;
        let now = self.now_ms();
        let wrapper = CacheWrapper::new(value, now, ttl);
        let Some(encoded) = self.encode(key, &wrapper) else {
            return Ok(false);
        };

        let owned = key.to_string();
        let installed = self
            .run_blocking("put_if_absent", move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let existing: Option<String> = tx
                    .query_row(SELECT_VALUE, params![&owned], |row| row.get(0))
                    .optional()?;

                // A payload that does not parse cannot hold the key.
                let occupied = existing
                    .as_deref()
                    .and_then(|raw| ExpiryProbe::parse(raw).ok())
                    .is_some_and(|probe| !is_expired(probe.expire_at, now));
                if occupied {
                    return Ok(false);
                }

                tx.execute(UPSERT, params![&owned, &encoded])?;
                tx.commit()?;
                Ok(true)
            })
            .await;

        match installed {
            Ok(true) => {
                self.recorder().record_write();
                Ok(true)
            }
            Ok(false) => {
                self.recorder().record_rejected_write();
                Ok(false)
            }
            Err(e) => {
                warn!(key, error = %e, "cache put_if_absent failed");
                self.recorder().record_rejected_write();
                Ok(false)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let owned = key.to_string();
        let deleted = self
            .run_blocking("delete", move |conn| {
                conn.execute(DELETE, params![owned])?;
                Ok(())
            })
            .await;

        if let Err(e) = deleted {
            warn!(key, error = %e, "cache delete failed");
        }
        Ok(())
    }

    async fn to_map(&self) -> BTreeMap<String, T> {
        let rows = match self.load_all().await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "cache listing failed");
                return BTreeMap::new();
            }
        };

        let now = self.now_ms();
        rows.into_iter()
            .filter_map(|(key, raw)| match serde_json::from_str::<CacheWrapper<T>>(&raw) {
                Ok(wrapper) if !wrapper.is_expired_at(now) => Some((key, wrapper.data)),
                Ok(_) => None,
                Err(e) => {
                    debug!(key = %key, error = %e, "skipping undecodable entry in listing");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl<T> Backend for SqliteStore<T>
where
    T: Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn sweep_expired(&self) -> Result<usize> {
        let started_at = self.now_ms();
        let (removed, skipped) = self
            .run_blocking("sweep", move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut skipped = 0usize;
                let expired = {
                    let mut stmt = tx.prepare(SELECT_ALL)?;
                    let rows = stmt
                        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

                    let mut expired = Vec::new();
                    for row in rows {
                        let (key, raw) = row?;
                        match ExpiryProbe::parse(&raw) {
                            Ok(probe) => {
                                if probe.expire_at.is_some_and(|expires| expires < started_at) {
                                    expired.push(key);
                                }
                            }
                            // Unparseable is not proof of expiry.
                            Err(_) => skipped += 1,
                        }
                    }
                    expired
                };

                {
                    let mut delete = tx.prepare(DELETE)?;
                    for key in &expired {
                        delete.execute(params![key])?;
                    }
                }
                tx.commit()?;
                Ok((expired.len(), skipped))
            })
            .await?;

        self.recorder().record_swept(removed);
        if skipped > 0 {
            warn!(skipped, "sweep skipped entries that failed to parse");
        }
        debug!(removed, "sqlite sweep finished");
        Ok(removed)
    }

    fn stats(&self) -> CacheStats {
        self.recorder().snapshot()
    }

    async fn close(&self) {
        let handle = Arc::clone(&self.handle);
        if let Err(e) = tokio::task::spawn_blocking(move || handle.close()).await {
            warn!(error = %e, "sqlite close task failed");
        }
    }
}
