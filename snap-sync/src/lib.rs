//! snap-sync library
//!
//! Incremental backups of snapper snapshots to another btrfs volume, local
//! or over SSH, using `btrfs send` / `btrfs receive`.

pub mod config;
pub mod executor;
pub mod notify;
pub mod prompt;
pub mod shutdown;
pub mod snapper;
pub mod transfer;
pub mod transport;
pub mod utils;
pub mod volume;

// Re-export commonly used types
pub use config::Settings;
pub use executor::SyncController;
pub use utils::errors::SyncError;
pub type Result<T> = std::result::Result<T, SyncError>;
