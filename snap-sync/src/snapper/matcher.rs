//! Finds the snapshot last synced to a destination.
//!
//! The "latest backup" tag lives in the source snapshot's metadata. Only
//! completed tags count: a snapshot still carrying the in-progress marker is
//! never a base for an incremental transfer.

use super::metadata::DestinationId;
use super::{Snapshot, SnapshotStore};
use crate::utils::errors::SnapperError;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    Found { number: u32, backupdir: String },
    NotFound,
}

/// Pick the snapshot tagged for `destination`. With several candidates the
/// highest number wins.
pub fn find_previous(snapshots: &[Snapshot], destination: &DestinationId, in_progress_marker: &str) -> Match {
    let mut candidates: Vec<(u32, String)> = snapshots
        .iter()
        .filter(|s| s.description.trim() != in_progress_marker)
        .filter_map(|s| {
            let record = s.metadata.destination_record()?;
            record
                .destination
                .matches(destination)
                .then_some((s.number, record.backupdir))
        })
        .collect();

    if candidates.len() > 1 {
        warn!(
            destination = %destination,
            snapshots = ?candidates.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            "Several snapshots are tagged for this destination; using the most recent"
        );
    }

    candidates.sort_by_key(|(number, _)| *number);
    match candidates.pop() {
        Some((number, backupdir)) => Match::Found { number, backupdir },
        None => Match::NotFound,
    }
}

/// List `config`'s snapshots and match them against `destination`.
pub async fn match_destination(
    store: &dyn SnapshotStore,
    config: &str,
    destination: &DestinationId,
    in_progress_marker: &str,
) -> Result<Match, SnapperError> {
    let snapshots = store.list(config).await?;
    let found = find_previous(&snapshots, destination, in_progress_marker);
    debug!(config, destination = %destination, result = ?found, "Matched previous snapshot");
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapper::Metadata;

    const MARKER: &str = "snap-sync in progress";

    fn snapshot(number: u32, description: &str, metadata: &str) -> Snapshot {
        Snapshot {
            number,
            description: description.to_string(),
            metadata: Metadata::parse(metadata),
            date: None,
        }
    }

    fn dest(uuid: &str) -> DestinationId {
        DestinationId { uuid: uuid.to_string(), subvolid: None }
    }

    #[test]
    fn test_no_snapshots() {
        assert_eq!(find_previous(&[], &dest("D1"), MARKER), Match::NotFound);
    }

    #[test]
    fn test_finds_tagged_snapshot() {
        let snapshots = vec![
            snapshot(3, "timeline", ""),
            snapshot(12, "latest incremental backup", "backupdir=backups, uuid=D1"),
            snapshot(13, "latest incremental backup", "backupdir=elsewhere, uuid=D2"),
        ];
        assert_eq!(
            find_previous(&snapshots, &dest("D1"), MARKER),
            Match::Found { number: 12, backupdir: "backups".into() }
        );
    }

    #[test]
    fn test_ignores_in_progress_snapshots() {
        // Metadata written, description still marked in progress.
        let snapshots = vec![
            snapshot(12, "latest incremental backup", "backupdir=backups, uuid=D1"),
            snapshot(13, MARKER, "backupdir=backups, uuid=D1"),
        ];
        assert_eq!(
            find_previous(&snapshots, &dest("D1"), MARKER),
            Match::Found { number: 12, backupdir: "backups".into() }
        );
    }

    #[test]
    fn test_most_recent_wins() {
        let snapshots = vec![
            snapshot(20, "backup", "backupdir=new, uuid=D1"),
            snapshot(12, "backup", "backupdir=old, uuid=D1"),
        ];
        assert_eq!(
            find_previous(&snapshots, &dest("D1"), MARKER),
            Match::Found { number: 20, backupdir: "new".into() }
        );
    }

    #[test]
    fn test_subvolid_must_agree_when_known() {
        let snapshots = vec![snapshot(12, "backup", "backupdir=b, subvolid=5, uuid=D1")];
        let other_subvol = DestinationId { uuid: "D1".into(), subvolid: Some("7".into()) };
        assert_eq!(find_previous(&snapshots, &other_subvol, MARKER), Match::NotFound);

        let same_subvol = DestinationId { uuid: "D1".into(), subvolid: Some("5".into()) };
        assert!(matches!(find_previous(&snapshots, &same_subvol, MARKER), Match::Found { .. }));
    }

    #[test]
    fn test_missing_backupdir_is_not_a_match() {
        let snapshots = vec![snapshot(12, "backup", "uuid=D1")];
        assert_eq!(find_previous(&snapshots, &dest("D1"), MARKER), Match::NotFound);
    }
}
