//! Snapshot metadata records.
//!
//! Snapper stores free-form userdata per snapshot, written on the command
//! line as a comma-separated `key=value` list. This is the only persisted
//! state snap-sync has: a completed sync is recorded on the source snapshot as
//! `backupdir=<dir>, subvolid=<id>, uuid=<destination>`.

use std::collections::BTreeMap;
use std::fmt;

pub const BACKUPDIR_KEY: &str = "backupdir";
pub const SUBVOLID_KEY: &str = "subvolid";
pub const UUID_KEY: &str = "uuid";

/// Ordered `key=value` record; writing an existing key overwrites it in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key=value, key2=value2`. Entries without `=` or with an empty
    /// key are dropped.
    pub fn parse(raw: &str) -> Self {
        let mut metadata = Self::new();
        for item in raw.split(',') {
            if let Some((key, value)) = item.split_once('=') {
                let key = key.trim();
                if !key.is_empty() {
                    metadata.set(key, value.trim());
                }
            }
        }
        metadata
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    /// Overlay `other` onto `self`; keys only present in `self` survive.
    pub fn merge(&mut self, other: &Metadata) {
        for (key, value) in &other.entries {
            self.set(key, value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The destination this snapshot was last synced to, if it carries one.
    pub fn destination_record(&self) -> Option<DestinationRecord> {
        let uuid = self.get(UUID_KEY).filter(|v| !v.is_empty())?;
        let backupdir = self.get(BACKUPDIR_KEY).filter(|v| !v.is_empty())?;
        Some(DestinationRecord {
            destination: DestinationId {
                uuid: uuid.to_string(),
                subvolid: self.get(SUBVOLID_KEY).filter(|v| !v.is_empty()).map(str::to_string),
            },
            backupdir: backupdir.to_string(),
        })
    }
}

impl From<BTreeMap<String, String>> for Metadata {
    fn from(map: BTreeMap<String, String>) -> Self {
        let mut metadata = Metadata::new();
        for (key, value) in &map {
            metadata.set(key, value);
        }
        metadata
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Values end up inside the comma-separated userdata list.
pub fn is_valid_value(value: &str) -> bool {
    !value.is_empty() && !value.contains([',', '=']) && value.trim() == value
}

/// Identity of a backup destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationId {
    pub uuid: String,
    pub subvolid: Option<String>,
}

impl DestinationId {
    /// Subvolume ids only disambiguate when both sides know theirs.
    pub fn matches(&self, other: &DestinationId) -> bool {
        self.uuid == other.uuid
            && match (&self.subvolid, &other.subvolid) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subvolid {
            Some(subvolid) => write!(f, "{} (subvolid {})", self.uuid, subvolid),
            None => f.write_str(&self.uuid),
        }
    }
}

/// "Latest backup" tag for one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationRecord {
    pub destination: DestinationId,
    pub backupdir: String,
}

impl DestinationRecord {
    /// The metadata entries written when tagging a completed sync.
    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.set(BACKUPDIR_KEY, &self.backupdir);
        if let Some(subvolid) = &self.destination.subvolid {
            metadata.set(SUBVOLID_KEY, subvolid);
        }
        metadata.set(UUID_KEY, &self.destination.uuid);
        metadata
    }
}
