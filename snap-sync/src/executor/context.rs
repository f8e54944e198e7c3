//! Per-run selections shared by every configuration's sync.

use crate::snapper::metadata::{self, DestinationId};
use crate::transfer::TransferMode;
use crate::utils::errors::SyncError;
use crate::volume::Volume;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// The resolved backup volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub id: DestinationId,
    pub mount: PathBuf,
}

impl From<Volume> for Destination {
    fn from(volume: Volume) -> Self {
        Self {
            id: DestinationId {
                uuid: volume.uuid,
                subvolid: volume.subvolid,
            },
            mount: volume.mount,
        }
    }
}

impl Destination {
    /// `<mount>/<backupdir>`
    pub fn backup_root(&self, backupdir: &str) -> PathBuf {
        self.mount.join(backupdir)
    }

    /// `<mount>/<backupdir>/<config>/<number>`
    pub fn snapshot_dir(&self, backupdir: &str, config: &str, number: u32) -> PathBuf {
        self.backup_root(backupdir).join(config).join(number.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Description set once a transfer completes
    pub description: String,
    /// Description of a snapshot whose transfer has not completed
    pub in_progress_marker: String,
    /// Backup directory given on the command line
    pub backupdir: Option<String>,
    /// Fallback backup directory from the settings file
    pub default_backupdir: Option<String>,
    /// Skip operator confirmation and prompts
    pub noconfirm: bool,
}

/// Everything the controller needs to know about this run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub destination: Destination,
    pub options: RunOptions,
}

/// Backup directories are relative to the mount and end up in snapshot metadata.
pub fn validate_backupdir(dir: &str) -> Result<String, SyncError> {
    let trimmed = dir.trim().trim_end_matches('/');
    let path = Path::new(trimmed);
    let relative = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !relative || !metadata::is_valid_value(trimmed) {
        return Err(SyncError::InvalidBackupDir { dir: dir.to_string() });
    }
    Ok(trimmed.to_string())
}

/// Points a configuration passes through during one sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Skipped,
    PendingMatch,
    SnapshotCreated,
    AwaitingConfirmation,
    Transferring,
    Tagged,
    OldDeleted,
    Aborted,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Skipped => "skipped",
            SyncState::PendingMatch => "pending match",
            SyncState::SnapshotCreated => "snapshot created",
            SyncState::AwaitingConfirmation => "awaiting confirmation",
            SyncState::Transferring => "transferring",
            SyncState::Tagged => "tagged",
            SyncState::OldDeleted => "old deleted",
            SyncState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Result of one configuration's sync.
#[derive(Debug)]
pub struct ConfigReport {
    pub config: String,
    /// Last state reached
    pub state: SyncState,
    /// Snapshot created by this run, if any
    pub snapshot: Option<u32>,
    /// Snapshot that served as the incremental base, if any
    pub previous: Option<u32>,
    pub mode: Option<TransferMode>,
    pub error: Option<SyncError>,
}

impl ConfigReport {
    pub fn new(config: &str) -> Self {
        Self {
            config: config.to_string(),
            state: SyncState::PendingMatch,
            snapshot: None,
            previous: None,
            mode: None,
            error: None,
        }
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Outcome of a whole run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<ConfigReport>,
    /// Set when an interrupt stopped the run before every configuration ran
    pub interrupted: bool,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        !self.interrupted && self.reports.iter().all(|r| !r.failed())
    }

    /// Configurations whose new snapshot was transferred and tagged.
    pub fn completed(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.state, SyncState::Tagged | SyncState::OldDeleted))
            .count()
    }
}
