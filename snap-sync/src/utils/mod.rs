//! Utility modules for snap-sync.

pub mod errors;
pub mod logger;

pub use errors::{Result, SyncError};
