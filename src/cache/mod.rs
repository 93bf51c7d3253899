//! Cache Module
//!
//! Expiring key/value storage behind one contract, with an in-memory and a
//! SQLite backend.

mod clock;
mod memory;
mod sqlite;
mod stats;
mod store;
mod wrapper;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use clock::{system_clock, Clock, ManualClock, SystemClock};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use stats::{CacheStats, StatsRecorder};
pub use store::{validate_key, Backend, CacheStore};
pub use wrapper::CacheWrapper;
