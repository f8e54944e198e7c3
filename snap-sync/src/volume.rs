//! Destination volume discovery.
//!
//! Lists mounted btrfs filesystems with `findmnt` through the destination
//! transport and resolves the one matching the requested identifier.

use crate::transport::{argv, Transport};
use crate::utils::errors::ResolveError;
use std::path::PathBuf;
use tracing::debug;

/// A mounted btrfs volume on the destination side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// Filesystem UUID, the destination identifier
    pub uuid: String,
    /// Mounted subvolume id, if reported in the mount options
    pub subvolid: Option<String>,
    pub mount: PathBuf,
}

impl std::fmt::Display for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (uuid={}", self.mount.display(), self.uuid)?;
        if let Some(subvolid) = &self.subvolid {
            write!(f, ", subvolid={}", subvolid)?;
        }
        write!(f, ")")
    }
}

/// Decode the `\xHH` escapes findmnt uses for whitespace in targets.
fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut rest = field;
    while let Some(pos) = rest.find("\\x") {
        out.push_str(&rest[..pos]);
        let hex = rest.get(pos + 2..pos + 4);
        match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
            Some(byte) => {
                out.push(byte as char);
                rest = &rest[pos + 4..];
            }
            None => {
                out.push_str("\\x");
                rest = &rest[pos + 2..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parse `findmnt -n -v -t btrfs -o UUID,OPTIONS,TARGET --list` output.
pub fn parse_findmnt(output: &str) -> Vec<Volume> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let uuid = fields.next()?.to_string();
            let options = fields.next()?;
            let target = fields.collect::<Vec<_>>().join(" ");
            if target.is_empty() {
                return None;
            }
            let subvolid = options
                .split(',')
                .find_map(|opt| opt.strip_prefix("subvolid="))
                .map(str::to_string);
            Some(Volume {
                uuid,
                subvolid,
                mount: PathBuf::from(unescape(&target)),
            })
        })
        .collect()
}

/// Enumerate mounted btrfs volumes through `transport`.
pub async fn list_volumes(transport: &dyn Transport) -> Result<Vec<Volume>, ResolveError> {
    let out = transport
        .run(&argv(["findmnt", "-n", "-v", "-t", "btrfs", "-o", "UUID,OPTIONS,TARGET", "--list"]))
        .await?;

    // findmnt exits 1 without output when nothing matches.
    if !out.success() && !out.stderr.trim().is_empty() {
        return Err(ResolveError::ListFailed(out.failure_reason()));
    }

    let volumes = parse_findmnt(&out.stdout);
    debug!(count = volumes.len(), via = %transport.describe(), "Listed btrfs volumes");
    Ok(volumes)
}

/// Pick the single volume matching `uuid` (narrowed by `subvolid` when given).
pub fn resolve(volumes: &[Volume], uuid: &str, subvolid: Option<&str>) -> Result<Volume, ResolveError> {
    let matches: Vec<&Volume> = volumes
        .iter()
        .filter(|v| v.uuid == uuid)
        .filter(|v| subvolid.is_none() || v.subvolid.as_deref() == subvolid)
        .collect();

    match matches.as_slice() {
        [] => Err(ResolveError::NotFound { uuid: uuid.to_string() }),
        [single] => Ok((*single).clone()),
        many => Err(ResolveError::AmbiguousTarget {
            uuid: uuid.to_string(),
            count: many.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FINDMNT: &str = "\
1111-aaaa rw,relatime,ssd,space_cache=v2,subvolid=5,subvol=/ /mnt/backup
1111-aaaa rw,relatime,ssd,space_cache=v2,subvolid=257,subvol=/data /mnt/backup\\x20data
2222-bbbb rw,noatime,subvolid=256,subvol=/@ /
";

    #[test]
    fn test_parse_findmnt() {
        let volumes = parse_findmnt(FINDMNT);
        assert_eq!(volumes.len(), 3);
        assert_eq!(volumes[0].uuid, "1111-aaaa");
        assert_eq!(volumes[0].subvolid.as_deref(), Some("5"));
        assert_eq!(volumes[1].mount, PathBuf::from("/mnt/backup data"));
        assert_eq!(volumes[2].mount, PathBuf::from("/"));
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        assert!(parse_findmnt("garbage\n\n").is_empty());
    }

    #[test]
    fn test_unescape_keeps_invalid_sequences() {
        assert_eq!(unescape("/mnt/a\\x20b"), "/mnt/a b");
        assert_eq!(unescape("/mnt/a\\xZZ"), "/mnt/a\\xZZ");
    }

    #[test]
    fn test_resolve_unique() {
        let volumes = parse_findmnt(FINDMNT);
        let volume = resolve(&volumes, "2222-bbbb", None).unwrap();
        assert_eq!(volume.mount, PathBuf::from("/"));
    }

    #[test]
    fn test_resolve_ambiguous() {
        let volumes = parse_findmnt(FINDMNT);
        let err = resolve(&volumes, "1111-aaaa", None).unwrap_err();
        assert!(matches!(err, ResolveError::AmbiguousTarget { count: 2, .. }));
    }

    #[test]
    fn test_resolve_narrowed_by_subvolid() {
        let volumes = parse_findmnt(FINDMNT);
        let volume = resolve(&volumes, "1111-aaaa", Some("257")).unwrap();
        assert_eq!(volume.mount, PathBuf::from("/mnt/backup data"));
    }

    #[test]
    fn test_resolve_not_found() {
        let volumes = parse_findmnt(FINDMNT);
        let err = resolve(&volumes, "3333-cccc", None).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }
}
