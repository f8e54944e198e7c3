//! Detects snapshots left behind by interrupted runs.

use super::{Snapshot, SnapshotStore};
use crate::utils::errors::SnapperError;

/// Snapshots of `config` still carrying the in-progress marker. Read-only;
/// the caller decides how loudly to report them.
pub async fn find_in_progress(
    store: &dyn SnapshotStore,
    config: &str,
    in_progress_marker: &str,
) -> Result<Vec<u32>, SnapperError> {
    let snapshots = store.list(config).await?;
    Ok(in_progress(&snapshots, in_progress_marker))
}

pub fn in_progress(snapshots: &[Snapshot], in_progress_marker: &str) -> Vec<u32> {
    snapshots
        .iter()
        .filter(|s| s.description.trim() == in_progress_marker)
        .map(|s| s.number)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapper::Metadata;

    #[test]
    fn test_counts_only_marked_snapshots() {
        let snapshots: Vec<Snapshot> = [(4, "timeline"), (7, "snap-sync in progress"), (9, "snap-sync in progress")]
            .into_iter()
            .map(|(number, description)| Snapshot {
                number,
                description: description.to_string(),
                metadata: Metadata::new(),
                date: None,
            })
            .collect();

        assert_eq!(in_progress(&snapshots, "snap-sync in progress"), vec![7, 9]);
        assert!(in_progress(&snapshots, "other marker").is_empty());
    }
}
