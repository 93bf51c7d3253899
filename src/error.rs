//! Error types for the cache subsystem
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache subsystem.
///
/// Most storage failures never reach callers: the stores log them and
/// degrade to a miss, `false` or a no-op. The variants that do surface are
/// argument validation, startup failures and the lock's `Conflict` signal.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Blank key or otherwise unusable argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Value could not be encoded or decoded
    #[error("Serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying SQLite call failed
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Backend could not be opened, or was used after close
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Duplicate or too-soon request rejected by the request lock
    #[error("Request already in progress: {0}")]
    Conflict(String),

    /// Store call exceeded the configured boundary timeout
    #[error("Cache operation timed out: {0}")]
    Timeout(String),
}

impl CacheError {
    /// Returns true for the request lock's throttling signal.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CacheError::Conflict(_))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache subsystem.
pub type Result<T> = std::result::Result<T, CacheError>;
