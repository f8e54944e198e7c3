//! Command transports.
//!
//! Every destination-side command (volume listing, directory checks,
//! `btrfs receive`, sidecar copy) goes through a [`Transport`] so the
//! controller does not care whether the backup volume is local or remote.

pub mod local;
pub mod ssh;

use crate::utils::errors::TransportError;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub use local::LocalTransport;
pub use ssh::{RemoteTarget, SshTransport};

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Short human-readable failure reason
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        match (self.status, stderr.is_empty()) {
            (Some(code), true) => format!("exit status {}", code),
            (Some(code), false) => format!("exit status {}: {}", code, stderr),
            (None, true) => "terminated by signal".to_string(),
            (None, false) => format!("terminated by signal: {}", stderr),
        }
    }
}

/// Outcome of piping a local producer into a command run through a transport.
#[derive(Debug)]
pub enum PipeOutcome {
    /// Both ends finished; callers must check both statuses
    Completed {
        producer: CommandOutput,
        consumer: CommandOutput,
    },
    /// The cancellation token fired; both ends were stopped
    Cancelled,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable description used in logs
    fn describe(&self) -> String;

    fn is_remote(&self) -> bool;

    /// Run `argv` and capture its output. A non-zero exit is not an error here.
    async fn run(&self, argv: &[String]) -> Result<CommandOutput, TransportError>;

    /// Run `producer` locally and stream its stdout into `consumer`, which
    /// runs through this transport.
    async fn pipe_from_local(
        &self,
        producer: &[String],
        consumer: &[String],
        cancel: &CancellationToken,
    ) -> Result<PipeOutcome, TransportError>;

    /// Copy a local file into `dest_dir`, keeping its file name.
    async fn copy_file(&self, local: &Path, dest_dir: &Path) -> Result<(), TransportError>;
}

/// Quote one argument for a POSIX shell.
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:@,+%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Join an argument vector into a single shell command line.
pub fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build an owned argument vector from string slices.
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parts.into_iter().map(|s| s.as_ref().to_string()).collect()
}
