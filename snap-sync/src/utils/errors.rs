//! Error types for snap-sync.
//!
//! Each layer has its own enum; [`SyncError`] is the controller-level
//! taxonomy that decides whether a failure aborts the whole run or only the
//! configuration being processed.

use std::path::PathBuf;
use thiserror::Error;

/// Failures running commands locally or over SSH.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("SSH connection to {host} unavailable: {reason}")]
    Unavailable { host: String, reason: String },

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blocking task failed: {0}")]
    Join(String),
}

/// Failures of the snapper subsystem.
#[derive(Error, Debug)]
pub enum SnapperError {
    #[error("snapper unavailable for config {config}: {reason}")]
    SubsystemUnavailable { config: String, reason: String },

    #[error("snapper {action} failed for config {config}: {stderr}")]
    CommandFailed {
        config: String,
        action: &'static str,
        stderr: String,
    },

    #[error("Snapshot {number} does not exist in config {config}")]
    NoSuchSnapshot { config: String, number: u32 },

    #[error("Failed to parse snapper output: {0}")]
    Parse(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failures of a send/receive transfer.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(#[from] TransportError),

    #[error("Transfer failed during {stage}: {detail}")]
    TransferFailed { stage: &'static str, detail: String },

    #[error("Destination {path} is not writable: {reason}")]
    DestinationNotWritable { path: PathBuf, reason: String },

    #[error("Transfer interrupted")]
    Cancelled,
}

/// Failures resolving the destination volume.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Multiple mounts ({count}) share identifier {uuid}; pass --subvolid to pick one")]
    AmbiguousTarget { uuid: String, count: usize },

    #[error("No mounted btrfs volume with identifier {uuid}")]
    NotFound { uuid: String },

    #[error("No mounted btrfs volumes found")]
    NoVolumes,

    #[error("Listing mounted volumes failed: {0}")]
    ListFailed(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failures loading the settings file or snapper configuration files.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unknown snapper configuration: {0}")]
    UnknownConfig(String),

    #[error("Configuration {name} has no SUBVOLUME entry")]
    MissingSubvolume { name: String },
}

/// Controller-level error taxonomy.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Setup error: {0}")]
    Setup(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolveError),

    #[error("Backup directory {} recorded in snapshot metadata does not exist at the destination", .path.display())]
    InconsistentDestination { path: PathBuf },

    #[error("No backup directory for config {config}; pass --backupdir when running non-interactively")]
    MissingBackupDir { config: String },

    #[error("Invalid backup directory {dir:?}: must be relative and must not contain ',' '=' or '..'")]
    InvalidBackupDir { dir: String },

    #[error("Snapshot subsystem error: {0}")]
    Subsystem(#[from] SnapperError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Prompt failed: {0}")]
    Prompt(#[source] std::io::Error),

    #[error("Interrupted")]
    Cancelled,
}

impl SyncError {
    /// Setup and resolution errors abort the run before any configuration is touched.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Setup(_) | SyncError::Config(_) | SyncError::Resolution(_) | SyncError::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
