//! Background Tasks Module
//!
//! Contains background tasks that run periodically while the cache is open.
//!
//! # Tasks
//! - Expiry Sweeper: Removes expired entries from a backend at a fixed period

mod sweeper;

pub use sweeper::{spawn_sweeper, sweep_once};
