//! Local command execution with tokio processes.

use super::{CommandOutput, PipeOutcome, Transport};
use crate::utils::errors::TransportError;
use async_trait::async_trait;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

fn command(argv: &[String]) -> Result<Command, TransportError> {
    let (program, args) = argv.split_first().ok_or_else(|| TransportError::Spawn {
        program: String::new(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
    })?;
    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);
    Ok(cmd)
}

fn spawn_error(argv: &[String], source: std::io::Error) -> TransportError {
    TransportError::Spawn {
        program: argv.first().cloned().unwrap_or_default(),
        source,
    }
}

fn into_output(output: Output) -> CommandOutput {
    CommandOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn describe(&self) -> String {
        "local".to_string()
    }

    fn is_remote(&self) -> bool {
        false
    }

    async fn run(&self, argv: &[String]) -> Result<CommandOutput, TransportError> {
        debug!(command = ?argv, "Running local command");
        let output = command(argv)?
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| spawn_error(argv, e))?;
        Ok(into_output(output))
    }

    async fn pipe_from_local(
        &self,
        producer: &[String],
        consumer: &[String],
        cancel: &CancellationToken,
    ) -> Result<PipeOutcome, TransportError> {
        debug!(producer = ?producer, consumer = ?consumer, "Starting local pipeline");

        let mut producer_child = command(producer)?
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(producer, e))?;

        let pipe: Stdio = producer_child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(producer, std::io::Error::other("producer stdout not captured")))?
            .try_into()?;

        // Dropping producer_child on error kills it (kill_on_drop).
        let consumer_child = command(consumer)?
            .stdin(pipe)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(consumer, e))?;

        let both = async {
            tokio::join!(
                producer_child.wait_with_output(),
                consumer_child.wait_with_output()
            )
        };

        tokio::select! {
            (producer_out, consumer_out) = both => Ok(PipeOutcome::Completed {
                producer: into_output(producer_out?),
                consumer: into_output(consumer_out?),
            }),
            _ = cancel.cancelled() => Ok(PipeOutcome::Cancelled),
        }
    }

    async fn copy_file(&self, local: &Path, dest_dir: &Path) -> Result<(), TransportError> {
        let name = local.file_name().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} has no file name", local.display()),
            ))
        })?;
        tokio::fs::copy(local, dest_dir.join(name)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::argv;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_captures_output() {
        let out = LocalTransport::new().run(&argv(["echo", "hello"])).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_reports_exit_status() {
        let out = LocalTransport::new()
            .run(&argv(["sh", "-c", "echo oops >&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(out.status, Some(3));
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let err = LocalTransport::new()
            .run(&argv(["/nonexistent/snap-sync-test-binary"]))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_pipe_streams_data() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out");
        let consumer = argv(["sh", "-c", &format!("cat > '{}'", target.display())]);

        let outcome = LocalTransport::new()
            .pipe_from_local(&argv(["printf", "stream-data"]), &consumer, &CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            PipeOutcome::Completed { producer, consumer } => {
                assert!(producer.success());
                assert!(consumer.success());
            }
            PipeOutcome::Cancelled => panic!("pipeline should not be cancelled"),
        }
        assert_eq!(std::fs::read_to_string(target).unwrap(), "stream-data");
    }

    #[tokio::test]
    async fn test_pipe_reports_producer_failure() {
        let outcome = LocalTransport::new()
            .pipe_from_local(
                &argv(["sh", "-c", "exit 1"]),
                &argv(["cat"]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match outcome {
            PipeOutcome::Completed { producer, consumer } => {
                assert_eq!(producer.status, Some(1));
                assert!(consumer.success());
            }
            PipeOutcome::Cancelled => panic!("pipeline should not be cancelled"),
        }
    }

    #[tokio::test]
    async fn test_pipe_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = LocalTransport::new()
            .pipe_from_local(&argv(["sleep", "5"]), &argv(["cat"]), &cancel)
            .await
            .unwrap();
        assert!(matches!(outcome, PipeOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_copy_file() {
        let src_dir = TempDir::new().unwrap();
        let dest_dir = TempDir::new().unwrap();
        let info = src_dir.path().join("info.xml");
        std::fs::write(&info, "<snapshot/>").unwrap();

        LocalTransport::new().copy_file(&info, dest_dir.path()).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dest_dir.path().join("info.xml")).unwrap(),
            "<snapshot/>"
        );
    }
}
