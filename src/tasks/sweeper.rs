//! Expiry Sweeper
//!
//! Background task that periodically removes expired cache entries so
//! storage does not grow without bound. Reads never depend on it: stores
//! already hide expired entries on their own.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::Backend;

/// Runs a single sweep pass and logs the outcome.
///
/// Failures are logged, never propagated: a failed pass simply leaves the
/// expired entries for the next one.
pub async fn sweep_once(backend: &dyn Backend) -> usize {
    match backend.sweep_expired().await {
        Ok(removed) => {
            let stats = backend.stats();
            if removed > 0 {
                info!(backend = backend.name(), removed, "expiry sweep removed entries");
            } else {
                debug!(backend = backend.name(), "expiry sweep found no expired entries");
            }
            debug!(
                backend = backend.name(),
                hits = stats.hits,
                misses = stats.misses,
                writes = stats.writes,
                swept_total = stats.swept,
                hit_rate = stats.hit_rate(),
                "cache stats"
            );
            removed
        }
        Err(e) => {
            warn!(backend = backend.name(), error = %e, "expiry sweep failed");
            0
        }
    }
}

/// Spawns a background task that sweeps `backend` every `period`.
///
/// The first pass runs one full period after spawning. A pass that has
/// started always finishes its batch: aborting the returned handle stops
/// the loop between passes, and a SQLite pass already handed to the
/// blocking pool still commits.
///
/// # Returns
/// A JoinHandle for the spawned task, aborted by the runtime at shutdown.
///
/// # Example
/// ```ignore
/// let store = Arc::new(MemoryStore::<String>::new());
/// let sweeper = spawn_sweeper(store.clone(), Duration::from_secs(60));
/// // Later, during shutdown:
/// sweeper.abort();
/// ```
pub fn spawn_sweeper(backend: Arc<dyn Backend>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            backend = backend.name(),
            period_secs = period.as_secs_f64(),
            "Starting expiry sweeper"
        );

        loop {
            tokio::time::sleep(period).await;
            sweep_once(backend.as_ref()).await;
        }
    })
}
