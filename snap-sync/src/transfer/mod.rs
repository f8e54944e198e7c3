//! Snapshot transfer with `btrfs send` / `btrfs receive`.
//!
//! The send side always runs locally; the receive side, directory checks and
//! the sidecar copy run through the destination transport. A transfer only
//! counts as successful when both ends of the pipe exit cleanly.

use crate::transport::{argv, PipeOutcome, Transport};
use crate::utils::errors::TransferError;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Full,
    Incremental,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::Full => f.write_str("full"),
            TransferMode::Incremental => f.write_str("incremental"),
        }
    }
}

/// One transfer invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Snapshot subvolume to send
    pub source: PathBuf,
    /// Sidecar info file copied next to the received data
    pub info: PathBuf,
    /// Snapshot already present at the destination, used as clone source
    pub base: Option<PathBuf>,
    /// Directory the snapshot is received into
    pub destination: PathBuf,
}

impl TransferRequest {
    pub fn mode(&self) -> TransferMode {
        if self.base.is_some() {
            TransferMode::Incremental
        } else {
            TransferMode::Full
        }
    }
}

#[async_trait]
pub trait TransferEngine: Send + Sync {
    async fn dir_exists(&self, path: &Path) -> Result<bool, TransferError>;

    /// Create `path` and its parents if absent.
    async fn create_dir(&self, path: &Path) -> Result<(), TransferError>;

    async fn transfer(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<TransferMode, TransferError>;
}

pub struct BtrfsTransfer {
    btrfs_bin: String,
    transport: Arc<dyn Transport>,
}

impl BtrfsTransfer {
    pub fn new(btrfs_bin: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            btrfs_bin: btrfs_bin.into(),
            transport,
        }
    }

    pub fn send_command(&self, request: &TransferRequest) -> Vec<String> {
        let mut cmd = argv([self.btrfs_bin.as_str(), "send"]);
        if let Some(base) = &request.base {
            cmd.push("-c".to_string());
            cmd.push(base.display().to_string());
        }
        cmd.push(request.source.display().to_string());
        cmd
    }

    pub fn receive_command(&self, request: &TransferRequest) -> Vec<String> {
        let destination = request.destination.display().to_string();
        argv([self.btrfs_bin.as_str(), "receive", destination.as_str()])
    }
}

#[async_trait]
impl TransferEngine for BtrfsTransfer {
    async fn dir_exists(&self, path: &Path) -> Result<bool, TransferError> {
        let path = path.display().to_string();
        let out = self.transport.run(&argv(["test", "-d", path.as_str()])).await?;
        Ok(out.success())
    }

    async fn create_dir(&self, path: &Path) -> Result<(), TransferError> {
        let display = path.display().to_string();
        let out = self.transport.run(&argv(["mkdir", "-p", display.as_str()])).await?;
        if !out.success() {
            return Err(TransferError::DestinationNotWritable {
                path: path.to_path_buf(),
                reason: out.failure_reason(),
            });
        }
        Ok(())
    }

    async fn transfer(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<TransferMode, TransferError> {
        let mode = request.mode();
        self.create_dir(&request.destination).await?;

        let send = self.send_command(request);
        let receive = self.receive_command(request);
        info!(
            mode = %mode,
            source = %request.source.display(),
            destination = %request.destination.display(),
            via = %self.transport.describe(),
            "Starting transfer"
        );
        let started = Instant::now();

        let (producer, consumer) = match self.transport.pipe_from_local(&send, &receive, cancel).await? {
            PipeOutcome::Completed { producer, consumer } => (producer, consumer),
            PipeOutcome::Cancelled => {
                warn!(destination = %request.destination.display(), "Transfer interrupted");
                return Err(TransferError::Cancelled);
            }
        };

        if !producer.success() {
            return Err(TransferError::TransferFailed {
                stage: "send",
                detail: producer.failure_reason(),
            });
        }
        if !consumer.success() {
            return Err(TransferError::TransferFailed {
                stage: "receive",
                detail: consumer.failure_reason(),
            });
        }

        self.transport
            .copy_file(&request.info, &request.destination)
            .await
            .map_err(|e| TransferError::TransferFailed {
                stage: "info copy",
                detail: e.to_string(),
            })?;

        info!(
            mode = %mode,
            destination = %request.destination.display(),
            elapsed_secs = started.elapsed().as_secs(),
            "Transfer complete"
        );
        Ok(mode)
    }
}
