//! CMS Cache - Expiring key/value cache with request-level locking
//!
//! Runs the cache subsystem standalone: opens the configured backend,
//! sweeps it on schedule and closes it cleanly on shutdown.

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cms_cache::{CacheRuntime, Config};

/// Main entry point for the cache service.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the configured backend and start the expiry sweeper
/// 4. Wait for SIGINT/SIGTERM
/// 5. Stop the sweeper and close the backend
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cms_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting cache service");

    let config = Config::from_env().context("invalid cache configuration")?;
    info!(
        "Configuration loaded: backend={:?}, work_dir={}, sweep_interval={}s, lock_ttl={}s",
        config.backend,
        config.work_dir.display(),
        config.sweep_interval,
        config.lock_ttl
    );

    // Running without the configured store is not an option.
    let runtime = CacheRuntime::start(&config).context("failed to open cache backend")?;
    info!("Cache ready");

    shutdown_signal().await;

    runtime.shutdown().await;
    info!("Cache service shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
