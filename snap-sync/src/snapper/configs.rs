//! Snapper configuration files.
//!
//! The global file lists configuration names in `SNAPPER_CONFIGS`; each
//! configuration has its own file under the configs directory holding
//! `SUBVOLUME` and the optional `SNAP_SYNC_EXCLUDE` flag. Both use
//! shell-style `KEY="value"` assignments.

use crate::utils::errors::ConfigError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const CONFIGS_KEY: &str = "SNAPPER_CONFIGS";
pub const SUBVOLUME_KEY: &str = "SUBVOLUME";
pub const EXCLUDE_KEY: &str = "SNAP_SYNC_EXCLUDE";

/// A snapper configuration: one subvolume and its snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub name: String,
    pub subvolume: PathBuf,
    pub excluded: bool,
}

/// Paths of one snapshot on the source side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPaths {
    /// Read-only subvolume holding the snapshot data
    pub data: PathBuf,
    /// Sidecar info file written by snapper
    pub info: PathBuf,
}

impl Configuration {
    pub fn snapshot_paths(&self, number: u32) -> SnapshotPaths {
        let base = self.subvolume.join(".snapshots").join(number.to_string());
        SnapshotPaths {
            data: base.join("snapshot"),
            info: base.join("info.xml"),
        }
    }
}

/// Parse shell-style `KEY="value"` assignments, ignoring comments.
pub fn parse_assignments(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

fn read(path: &Path) -> Result<String, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::MissingFile(path.to_path_buf()));
    }
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Names listed in the global snapper file.
pub fn load_config_names(global: &Path) -> Result<Vec<String>, ConfigError> {
    let vars = parse_assignments(&read(global)?);
    Ok(vars
        .get(CONFIGS_KEY)
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default())
}

/// Load one configuration from `configs_dir/<name>`.
pub fn load_configuration(configs_dir: &Path, name: &str) -> Result<Configuration, ConfigError> {
    let path = configs_dir.join(name);
    if !path.exists() {
        return Err(ConfigError::UnknownConfig(name.to_string()));
    }
    let vars = parse_assignments(&read(&path)?);
    let subvolume = vars
        .get(SUBVOLUME_KEY)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingSubvolume { name: name.to_string() })?;
    let excluded = vars
        .get(EXCLUDE_KEY)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "yes" | "true" | "1"))
        .unwrap_or(false);

    Ok(Configuration {
        name: name.to_string(),
        subvolume: PathBuf::from(subvolume),
        excluded,
    })
}

/// Load the selected configurations, or every configured one when `selected`
/// is empty. The global file must exist either way.
pub fn load_configurations(
    global: Option<&Path>,
    global_expected: &Path,
    configs_dir: &Path,
    selected: &[String],
) -> Result<Vec<Configuration>, ConfigError> {
    let global = global.ok_or_else(|| ConfigError::MissingFile(global_expected.to_path_buf()))?;
    let names = if selected.is_empty() {
        load_config_names(global)?
    } else {
        selected.to_vec()
    };

    names
        .iter()
        .map(|name| load_configuration(configs_dir, name))
        .collect()
}
