//! Cache Runtime
//!
//! Owns the process-wide cache backend from startup to shutdown.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::{system_clock, Backend, CacheStore, Clock, MemoryStore, SqliteStore};
use crate::config::{BackendKind, Config};
use crate::error::Result;
use crate::lock::RequestLock;
use crate::tasks::spawn_sweeper;

/// The opened backend, its sweeper, and the handles consumers share.
///
/// Built once at startup and passed to whatever needs the cache; nothing
/// else opens or closes storage.
pub struct CacheRuntime {
    store: Arc<dyn CacheStore<String>>,
    backend: Arc<dyn Backend>,
    sweeper: JoinHandle<()>,
    config: Config,
}

impl CacheRuntime {
    /// Opens the configured backend and starts the sweeper.
    ///
    /// Must be called inside a tokio runtime. A backend that cannot be
    /// opened is reported as `BackendUnavailable`; callers should treat
    /// that as fatal.
    pub fn start(config: &Config) -> Result<Self> {
        Self::start_with_clock(config, system_clock())
    }

    pub fn start_with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let (store, backend) = match config.backend {
            BackendKind::Memory => {
                let store = Arc::new(MemoryStore::<String>::with_clock(clock));
                let backend: Arc<dyn Backend> = store.clone();
                (store as Arc<dyn CacheStore<String>>, backend)
            }
            BackendKind::Sqlite => {
                let store = Arc::new(SqliteStore::<String>::open(config.database_path(), clock)?);
                let backend: Arc<dyn Backend> = store.clone();
                (store as Arc<dyn CacheStore<String>>, backend)
            }
        };

        let sweeper = spawn_sweeper(Arc::clone(&backend), config.sweep_period());
        info!(
            backend = backend.name(),
            sweep_interval_secs = config.sweep_interval,
            "cache runtime started"
        );

        Ok(Self {
            store,
            backend,
            sweeper,
            config: config.clone(),
        })
    }

    /// Shared string-valued store for direct caching (tokens, previews).
    pub fn store(&self) -> Arc<dyn CacheStore<String>> {
        Arc::clone(&self.store)
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.backend)
    }

    /// Request lock over the shared store, using the configured TTL and timeout.
    pub fn request_lock(&self) -> RequestLock {
        RequestLock::new(
            self.store(),
            self.config.lock_ttl(),
            self.config.store_timeout(),
        )
    }

    /// Stops the sweeper, then closes the backend.
    ///
    /// The backend is closed even if the sweeper did not stop cleanly.
    pub async fn shutdown(self) {
        self.sweeper.abort();
        match self.sweeper.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => info!("expiry sweeper stopped"),
            Err(e) => warn!(error = %e, "expiry sweeper ended abnormally"),
        }

        self.backend.close().await;
        info!(backend = self.backend.name(), "cache runtime shut down");
    }
}
