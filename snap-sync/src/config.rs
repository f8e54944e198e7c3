//! Settings for snap-sync.
//!
//! Loads optional settings from a TOML file. Every field has a default so a
//! missing file or a partial file both work; command-line flags override.

use crate::utils::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the settings file.
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/snap-sync.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub snapper: SnapperSettings,
    pub backup: BackupSettings,
    pub ssh: SshSettings,
    pub log: LogSettings,
    pub notify: NotifySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapperSettings {
    /// Global snapper file listing configuration names (SNAPPER_CONFIGS)
    pub global_config: PathBuf,

    /// Fallback global file used when `global_config` is absent
    pub global_config_fallback: PathBuf,

    /// Directory holding one file per snapper configuration
    pub configs_dir: PathBuf,

    /// snapper executable
    pub snapper_bin: String,

    /// btrfs executable
    pub btrfs_bin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Description set on a snapshot once its transfer completes
    pub description: String,

    /// Description marking a snapshot whose transfer has not completed
    pub in_progress_marker: String,

    /// Backup directory used on first sync when none is given and prompting is off
    pub default_backupdir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    /// Remote user when `--remote` carries none
    pub user: String,

    /// Remote port when `--port` is not given
    pub port: u16,

    /// Private key used when the SSH agent has no usable identity
    pub identity_file: Option<PathBuf>,

    /// known_hosts file used to verify the remote host key
    pub known_hosts: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    /// Send desktop notifications
    pub enabled: bool,

    /// notify-send executable
    pub notify_bin: String,
}

impl Default for SnapperSettings {
    fn default() -> Self {
        Self {
            global_config: PathBuf::from("/etc/conf.d/snapper"),
            global_config_fallback: PathBuf::from("/etc/default/snapper"),
            configs_dir: PathBuf::from("/etc/snapper/configs"),
            snapper_bin: "snapper".to_string(),
            btrfs_bin: "btrfs".to_string(),
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            description: "latest incremental backup".to_string(),
            in_progress_marker: "snap-sync in progress".to_string(),
            default_backupdir: None,
        }
    }
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            identity_file: None,
            known_hosts: None,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            notify_bin: "notify-send".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Load settings from `path` if given, otherwise from the default
    /// location when it exists, otherwise defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) if !path.exists() => Err(ConfigError::MissingFile(path.to_path_buf())),
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_SETTINGS_PATH);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// The global snapper file that exists, preferring the primary location.
    pub fn global_config_path(&self) -> Option<&Path> {
        [&self.snapper.global_config, &self.snapper.global_config_fallback]
            .into_iter()
            .map(PathBuf::as_path)
            .find(|p| p.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.backup.in_progress_marker, "snap-sync in progress");
        assert_eq!(settings.backup.description, "latest incremental backup");
        assert_eq!(settings.ssh.port, 22);
        assert!(settings.notify.enabled);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[backup]
default_backupdir = "backups"

[ssh]
port = 2222
"#
        )
        .unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.backup.default_backupdir.as_deref(), Some("backups"));
        assert_eq!(settings.backup.in_progress_marker, "snap-sync in progress");
        assert_eq!(settings.ssh.port, 2222);
        assert_eq!(settings.ssh.user, "root");
        assert_eq!(settings.log.level, "info");
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let err = Settings::load(Some(Path::new("/nonexistent/snap-sync.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile(_)));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[ssh]\nport = \"not a number\"").unwrap();
        assert!(matches!(Settings::from_file(file.path()), Err(ConfigError::Parse(_))));
    }
}
