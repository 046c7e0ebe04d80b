//! Database module for pollwatch.
//!
//! Provides SQLite storage for devices, their status records, poller
//! settings and the device event log.

mod models;
mod store;

pub use models::*;
pub use store::*;
