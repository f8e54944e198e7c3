//! Snapshot store adapter built on the snapper CLI.
//!
//! Snapper owns the snapshots; this module only asks it to create, list,
//! retag and delete single-type snapshots of one configuration.

pub mod configs;
pub mod matcher;
pub mod metadata;
pub mod recovery;

use crate::transport::{argv, CommandOutput, Transport};
use crate::utils::errors::SnapperError;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

pub use configs::{Configuration, SnapshotPaths};
pub use metadata::Metadata;

/// A single-type snapshot as listed by snapper.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub number: u32,
    pub description: String,
    pub metadata: Metadata,
    pub date: Option<NaiveDateTime>,
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Single-type snapshots of `config`, oldest first.
    async fn list(&self, config: &str) -> Result<Vec<Snapshot>, SnapperError>;

    /// Create a single-type snapshot and return its number.
    async fn create(&self, config: &str, description: &str) -> Result<u32, SnapperError>;

    /// Delete a snapshot. A missing snapshot is an error.
    async fn delete(&self, config: &str, number: u32) -> Result<(), SnapperError>;

    /// Replace the description and merge `metadata` into the snapshot's
    /// existing metadata; keys not in `metadata` are kept.
    async fn tag(
        &self,
        config: &str,
        number: u32,
        description: &str,
        metadata: &Metadata,
    ) -> Result<(), SnapperError>;

    fn path(&self, config: &Configuration, number: u32) -> SnapshotPaths {
        config.snapshot_paths(number)
    }
}

/// One entry of `snapper --jsonout list`.
#[derive(Debug, Deserialize)]
struct ListEntry {
    number: u32,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    userdata: Option<BTreeMap<String, String>>,
}

/// Parse the JSON listing for `config`, dropping snapshot 0 ("current").
pub fn parse_listing(config: &str, json: &str) -> Result<Vec<Snapshot>, SnapperError> {
    let mut by_config: HashMap<String, Vec<ListEntry>> =
        serde_json::from_str(json).map_err(|e| SnapperError::Parse(e.to_string()))?;
    let entries = by_config
        .remove(config)
        .ok_or_else(|| SnapperError::Parse(format!("listing has no entry for config {}", config)))?;

    let mut snapshots: Vec<Snapshot> = entries
        .into_iter()
        .filter(|e| e.number != 0)
        .filter(|e| e.kind.as_deref().map_or(true, |k| k == "single"))
        .map(|e| Snapshot {
            number: e.number,
            description: e.description.unwrap_or_default(),
            metadata: e.userdata.map(Metadata::from).unwrap_or_default(),
            date: e
                .date
                .as_deref()
                .and_then(|d| NaiveDateTime::parse_from_str(d, "%Y-%m-%d %H:%M:%S").ok()),
        })
        .collect();
    snapshots.sort_by_key(|s| s.number);
    Ok(snapshots)
}

/// snapper CLI adapter. Commands run through a transport so they can be
/// routed like every other subsystem call.
pub struct Snapper {
    bin: String,
    transport: Arc<dyn Transport>,
}

impl Snapper {
    pub fn new(bin: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            bin: bin.into(),
            transport,
        }
    }

    fn command<'a>(&self, config: &str, args: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut cmd = argv([self.bin.as_str(), "-c", config]);
        cmd.extend(args.into_iter().map(str::to_string));
        cmd
    }

    async fn run(
        &self,
        config: &str,
        action: &'static str,
        cmd: Vec<String>,
    ) -> Result<CommandOutput, SnapperError> {
        debug!(config, action, "Running snapper");
        let out = self.transport.run(&cmd).await?;
        if out.success() {
            return Ok(out);
        }

        let stderr = out.stderr.trim().to_string();
        if stderr.contains("Unknown config") || stderr.contains("Config '") {
            return Err(SnapperError::SubsystemUnavailable {
                config: config.to_string(),
                reason: stderr,
            });
        }
        Err(SnapperError::CommandFailed {
            config: config.to_string(),
            action,
            stderr: out.failure_reason(),
        })
    }
}

#[async_trait]
impl SnapshotStore for Snapper {
    async fn list(&self, config: &str) -> Result<Vec<Snapshot>, SnapperError> {
        let mut cmd = argv([self.bin.as_str(), "--jsonout", "-c", config]);
        cmd.extend(argv(["list", "--type", "single", "--disable-used-space"]));
        let out = self.run(config, "list", cmd).await?;
        parse_listing(config, &out.stdout)
    }

    async fn create(&self, config: &str, description: &str) -> Result<u32, SnapperError> {
        let cmd = self.command(
            config,
            ["create", "--type", "single", "--print-number", "--description", description],
        );
        let out = self.run(config, "create", cmd).await.map_err(|e| match e {
            SnapperError::CommandFailed { config, stderr, .. } => {
                SnapperError::SubsystemUnavailable { config, reason: stderr }
            }
            other => other,
        })?;
        let number = out
            .stdout
            .trim()
            .parse::<u32>()
            .map_err(|_| SnapperError::Parse(format!("unexpected create output: {:?}", out.stdout)))?;
        info!(config, number, description, "Created snapshot");
        Ok(number)
    }

    async fn delete(&self, config: &str, number: u32) -> Result<(), SnapperError> {
        let n = number.to_string();
        let cmd = self.command(config, ["delete", n.as_str()]);
        match self.run(config, "delete", cmd).await {
            Ok(_) => {
                info!(config, number, "Deleted snapshot");
                Ok(())
            }
            Err(SnapperError::CommandFailed { stderr, .. }) if stderr.contains("not found") => {
                Err(SnapperError::NoSuchSnapshot {
                    config: config.to_string(),
                    number,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn tag(
        &self,
        config: &str,
        number: u32,
        description: &str,
        metadata: &Metadata,
    ) -> Result<(), SnapperError> {
        let mut merged = self
            .list(config)
            .await?
            .into_iter()
            .find(|s| s.number == number)
            .ok_or_else(|| SnapperError::NoSuchSnapshot {
                config: config.to_string(),
                number,
            })?
            .metadata;
        merged.merge(metadata);

        let userdata = merged.to_string();
        let n = number.to_string();
        let cmd = self.command(
            config,
            ["modify", "--description", description, "--userdata", userdata.as_str(), n.as_str()],
        );
        self.run(config, "modify", cmd).await?;
        info!(config, number, description, userdata = %userdata, "Tagged snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PipeOutcome;
    use crate::utils::errors::TransportError;
    use std::path::Path;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    const LISTING: &str = r#"{
  "root": [
    { "subvolume": "/", "number": 0, "default": false, "active": false, "type": "single",
      "pre-number": null, "date": "", "user": "", "cleanup": "", "description": "current", "userdata": null },
    { "subvolume": "/", "number": 12, "default": false, "active": false, "type": "single",
      "pre-number": null, "date": "2026-10-01 03:00:00", "user": "root", "cleanup": "",
      "description": "latest incremental backup", "userdata": { "backupdir": "backups", "uuid": "D1" } },
    { "subvolume": "/", "number": 14, "default": false, "active": false, "type": "single",
      "pre-number": null, "date": "2026-10-02 03:00:00", "user": "root", "cleanup": "",
      "description": "snap-sync in progress", "userdata": null }
  ]
}"#;

    /// Records commands and answers them from a script.
    struct ScriptedTransport {
        calls: Mutex<Vec<Vec<String>>>,
        responses: Mutex<Vec<CommandOutput>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<CommandOutput>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                responses: Mutex::new(responses),
            })
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            status: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            status: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        fn is_remote(&self) -> bool {
            false
        }

        async fn run(&self, argv: &[String]) -> Result<CommandOutput, TransportError> {
            self.calls.lock().unwrap().push(argv.to_vec());
            Ok(self.responses.lock().unwrap().remove(0))
        }

        async fn pipe_from_local(
            &self,
            _producer: &[String],
            _consumer: &[String],
            _cancel: &CancellationToken,
        ) -> Result<PipeOutcome, TransportError> {
            unimplemented!("snapper never pipes")
        }

        async fn copy_file(&self, _local: &Path, _dest_dir: &Path) -> Result<(), TransportError> {
            unimplemented!("snapper never copies")
        }
    }

    #[test]
    fn test_parse_listing() {
        let snapshots = parse_listing("root", LISTING).unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].number, 12);
        assert_eq!(snapshots[0].metadata.get("uuid"), Some("D1"));
        assert!(snapshots[0].date.is_some());
        assert_eq!(snapshots[1].description, "snap-sync in progress");
        assert!(snapshots[1].metadata.is_empty());
    }

    #[test]
    fn test_parse_listing_wrong_config() {
        assert!(matches!(parse_listing("home", LISTING), Err(SnapperError::Parse(_))));
        assert!(matches!(parse_listing("root", "not json"), Err(SnapperError::Parse(_))));
    }

    #[tokio::test]
    async fn test_create_returns_number() {
        let transport = ScriptedTransport::new(vec![ok("15\n")]);
        let snapper = Snapper::new("snapper", transport.clone());

        let number = snapper.create("root", "snap-sync in progress").await.unwrap();
        assert_eq!(number, 15);
        assert_eq!(
            transport.calls()[0],
            argv([
                "snapper", "-c", "root", "create", "--type", "single", "--print-number",
                "--description", "snap-sync in progress"
            ])
        );
    }

    #[tokio::test]
    async fn test_create_failure_is_subsystem_unavailable() {
        let transport = ScriptedTransport::new(vec![failed("Unknown config.")]);
        let snapper = Snapper::new("snapper", transport);
        let err = snapper.create("nope", "x").await.unwrap_err();
        assert!(matches!(err, SnapperError::SubsystemUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_delete_missing_snapshot() {
        let transport = ScriptedTransport::new(vec![failed("Snapshot '99' not found.")]);
        let snapper = Snapper::new("snapper", transport);
        let err = snapper.delete("root", 99).await.unwrap_err();
        assert!(matches!(err, SnapperError::NoSuchSnapshot { number: 99, .. }));
    }

    #[tokio::test]
    async fn test_tag_merges_existing_metadata() {
        let transport = ScriptedTransport::new(vec![ok(LISTING), ok("")]);
        let snapper = Snapper::new("snapper", transport.clone());

        let update = Metadata::parse("uuid=D2, backupdir=other");
        snapper.tag("root", 12, "latest incremental backup", &update).await.unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[1],
            argv([
                "snapper", "-c", "root", "modify", "--description", "latest incremental backup",
                "--userdata", "backupdir=other, uuid=D2", "12"
            ])
        );
    }

    #[tokio::test]
    async fn test_tag_missing_snapshot() {
        let transport = ScriptedTransport::new(vec![ok(LISTING)]);
        let snapper = Snapper::new("snapper", transport);
        let err = snapper.tag("root", 40, "x", &Metadata::new()).await.unwrap_err();
        assert!(matches!(err, SnapperError::NoSuchSnapshot { number: 40, .. }));
    }
}
