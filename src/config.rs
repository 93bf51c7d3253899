//! Configuration Module
//!
//! Handles loading cache subsystem settings from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CacheError, Result};

/// File name of the SQLite database inside the working directory.
pub const DATABASE_FILE: &str = "cache.db";

/// Which storage engine backs the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Process-local map, lost on restart
    Memory,
    /// SQLite file in the working directory
    Sqlite,
}

impl FromStr for BackendKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "sqlite" => Ok(BackendKind::Sqlite),
            other => Err(CacheError::InvalidArgument(format!(
                "unknown cache backend '{}', expected 'memory' or 'sqlite'",
                other
            ))),
        }
    }
}

/// Cache subsystem configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage engine to open at startup
    pub backend: BackendKind,
    /// Directory holding the persistent store
    pub work_dir: PathBuf,
    /// Interval in seconds between expiry sweeps
    pub sweep_interval: u64,
    /// Boundary timeout in milliseconds for request lock store calls
    pub store_timeout_ms: u64,
    /// Default request lock TTL in seconds
    pub lock_ttl: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_BACKEND` - `memory` or `sqlite` (default: memory)
    /// - `CACHE_WORK_DIR` - Directory for the database file (default: ./data)
    /// - `SWEEP_INTERVAL` - Sweep frequency in seconds (default: 60)
    /// - `STORE_TIMEOUT_MS` - Lock store call timeout (default: 500)
    /// - `LOCK_TTL` - Default lock TTL in seconds (default: 600)
    ///
    /// Zero or unparseable durations fall back to their defaults.
    /// An unrecognised backend name is an error: the process must not run
    /// on a different store than the one it was configured for.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let backend = match env::var("CACHE_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.backend,
        };

        Ok(Self {
            backend,
            work_dir: env::var("CACHE_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            sweep_interval: env::var("SWEEP_INTERVAL")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.sweep_interval),
            store_timeout_ms: env::var("STORE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.store_timeout_ms),
            lock_ttl: env::var("LOCK_TTL")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.lock_ttl),
        })
    }

    /// Full path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.work_dir.join(DATABASE_FILE)
    }

    pub fn sweep_period(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            work_dir: PathBuf::from("./data"),
            sweep_interval: 60,
            store_timeout_ms: 500,
            lock_ttl: 600,
        }
    }
}
