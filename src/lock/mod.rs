//! Request Lock Module
//!
//! Deduplicates state-mutating requests (double-submitted comments,
//! double-clicked likes) by holding a fingerprint key in the cache while
//! the request runs.

mod guard;
mod request_lock;

pub use guard::LockGuard;
pub use request_lock::{LockSpec, RequestLock, LOCK_KEY_PREFIX};
