//! CMS Cache - Expiring key/value cache with request-level locking
//!
//! Provides a pluggable store with per-entry TTL, an in-memory and a SQLite
//! backend, a background expiry sweeper, and a request lock that rejects
//! duplicate in-flight operations.

pub mod cache;
pub mod config;
pub mod error;
pub mod lock;
pub mod runtime;
pub mod tasks;

pub use cache::{CacheStore, CacheWrapper};
pub use config::Config;
pub use error::{CacheError, Result};
pub use lock::{LockSpec, RequestLock};
pub use runtime::CacheRuntime;
