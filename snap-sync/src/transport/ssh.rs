//! Remote command execution over an SSH session.
//!
//! libssh2 is blocking, so every session operation runs inside
//! `spawn_blocking`. The session authenticates through the SSH agent first and
//! falls back to a configured identity file; the host key must already be in
//! known_hosts.

use super::{shell_join, CommandOutput, PipeOutcome, Transport};
use crate::config::SshSettings;
use crate::utils::errors::TransportError;
use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use ssh2::{CheckResult, KnownHostFileKind, Session};
use std::io::Read;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// `[user@]host[:port]` as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl RemoteTarget {
    /// Parse a remote spec. An explicit `port` wins over one embedded in the
    /// spec, which wins over `settings.port`.
    pub fn parse(spec: &str, port: Option<u16>, settings: &SshSettings) -> Self {
        let (user, rest) = match spec.split_once('@') {
            Some((user, rest)) if !user.is_empty() => (user.to_string(), rest),
            Some((_, rest)) => (settings.user.clone(), rest),
            None => (settings.user.clone(), spec),
        };

        // Bracketed IPv6 literal: [::1]:2222
        let (host, embedded_port) = if let Some(stripped) = rest.strip_prefix('[') {
            match stripped.split_once(']') {
                Some((host, tail)) => (
                    host.to_string(),
                    tail.strip_prefix(':').and_then(|p| p.parse().ok()),
                ),
                None => (rest.to_string(), None),
            }
        } else {
            match rest.rsplit_once(':') {
                Some((host, p)) if !host.contains(':') => match p.parse::<u16>() {
                    Ok(p) => (host.to_string(), Some(p)),
                    Err(_) => (rest.to_string(), None),
                },
                _ => (rest.to_string(), None),
            }
        };

        Self {
            user,
            host,
            port: port.or(embedded_port).unwrap_or(settings.port),
        }
    }
}

impl std::fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

pub struct SshTransport {
    session: Arc<Session>,
    target: RemoteTarget,
}

impl SshTransport {
    /// Open and authenticate a session to `target`.
    pub async fn connect(target: RemoteTarget, settings: &SshSettings) -> Result<Self, TransportError> {
        let known_hosts = settings.known_hosts.clone().unwrap_or_else(default_known_hosts);
        let identity = settings.identity_file.clone();
        let connect_target = target.clone();

        info!(remote = %target, "Connecting to remote host");
        let session = tokio::task::spawn_blocking(move || {
            connect_blocking(&connect_target, &known_hosts, identity.as_deref())
        })
        .await
        .map_err(|e| TransportError::Join(e.to_string()))??;

        Ok(Self {
            session: Arc::new(session),
            target,
        })
    }

    fn unavailable(&self, reason: impl Into<String>) -> TransportError {
        TransportError::Unavailable {
            host: self.target.to_string(),
            reason: reason.into(),
        }
    }
}

fn default_known_hosts() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/root"))
        .join(".ssh/known_hosts")
}

fn connect_blocking(
    target: &RemoteTarget,
    known_hosts: &Path,
    identity: Option<&Path>,
) -> Result<Session, TransportError> {
    let unavailable = |reason: String| TransportError::Unavailable {
        host: target.to_string(),
        reason,
    };

    let tcp = TcpStream::connect((target.host.as_str(), target.port))
        .map_err(|e| unavailable(format!("connect failed: {}", e)))?;
    let mut sess = Session::new()?;
    sess.set_tcp_stream(tcp);
    sess.handshake()
        .map_err(|e| unavailable(format!("handshake failed: {}", e)))?;

    verify_host_key(&sess, target, known_hosts)?;

    if let Err(e) = sess.userauth_agent(&target.user) {
        debug!(error = %e, "SSH agent authentication failed");
        if let Some(identity) = identity {
            sess.userauth_pubkey_file(&target.user, None, identity, None)
                .map_err(|e| unavailable(format!("public key authentication failed: {}", e)))?;
        }
    }

    if !sess.authenticated() {
        return Err(unavailable("authentication failed".to_string()));
    }

    Ok(sess)
}

fn verify_host_key(sess: &Session, target: &RemoteTarget, known_hosts: &Path) -> Result<(), TransportError> {
    let unavailable = |reason: String| TransportError::Unavailable {
        host: target.to_string(),
        reason,
    };

    let mut known = sess.known_hosts()?;
    known
        .read_file(known_hosts, KnownHostFileKind::OpenSSH)
        .map_err(|e| unavailable(format!("cannot read {}: {}", known_hosts.display(), e)))?;
    let (key, _) = sess
        .host_key()
        .ok_or_else(|| unavailable("server sent no host key".to_string()))?;

    match known.check_port(&target.host, target.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::NotFound => Err(unavailable(format!(
            "host key not found in {}",
            known_hosts.display()
        ))),
        CheckResult::Mismatch => Err(unavailable("host key mismatch".to_string())),
        CheckResult::Failure => Err(unavailable("host key check failed".to_string())),
    }
}

fn exec_blocking(sess: &Session, command: &str) -> Result<CommandOutput, TransportError> {
    let mut channel = sess.channel_session()?;
    channel.exec(command)?;

    let mut stdout = String::new();
    channel.read_to_string(&mut stdout)?;
    let mut stderr = String::new();
    channel.stderr().read_to_string(&mut stderr)?;

    channel.wait_close()?;
    Ok(CommandOutput {
        status: Some(channel.exit_status()?),
        stdout,
        stderr,
    })
}

/// Stream `producer`'s stdout into a remote `command`.
fn pipe_blocking(
    sess: &Session,
    mut producer: std::process::Child,
    command: &str,
) -> Result<(CommandOutput, CommandOutput), TransportError> {
    let mut producer_stdout = producer
        .stdout
        .take()
        .ok_or_else(|| TransportError::Io(std::io::Error::other("producer stdout not captured")))?;
    let producer_stderr = producer.stderr.take();
    let stderr_reader = std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut stderr) = producer_stderr {
            let _ = stderr.read_to_string(&mut buf);
        }
        buf
    });

    let mut channel = sess.channel_session()?;
    channel.exec(command)?;

    // A broken channel shows up in the remote exit status below.
    if let Err(e) = std::io::copy(&mut producer_stdout, &mut channel) {
        warn!(error = %e, "Stream to remote host interrupted");
    }
    drop(producer_stdout);
    channel.send_eof()?;

    let mut stdout = String::new();
    channel.read_to_string(&mut stdout)?;
    let mut stderr = String::new();
    channel.stderr().read_to_string(&mut stderr)?;
    channel.wait_close()?;
    let consumer = CommandOutput {
        status: Some(channel.exit_status()?),
        stdout,
        stderr,
    };

    let status = producer.wait()?;
    let producer = CommandOutput {
        status: status.code(),
        stdout: String::new(),
        stderr: stderr_reader.join().unwrap_or_default(),
    };

    Ok((producer, consumer))
}

fn upload_blocking(sess: &Session, local: &Path, dest: &Path) -> Result<(), TransportError> {
    let sftp = sess.sftp()?;
    let mut remote_file = sftp.create(dest)?;
    let mut local_file = std::fs::File::open(local)?;
    std::io::copy(&mut local_file, &mut remote_file)?;
    Ok(())
}

#[async_trait]
impl Transport for SshTransport {
    fn describe(&self) -> String {
        format!("ssh://{}", self.target)
    }

    fn is_remote(&self) -> bool {
        true
    }

    async fn run(&self, argv: &[String]) -> Result<CommandOutput, TransportError> {
        let command = shell_join(argv);
        debug!(remote = %self.target, command = %command, "Running remote command");
        let sess = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || exec_blocking(&sess, &command))
            .await
            .map_err(|e| TransportError::Join(e.to_string()))?
    }

    async fn pipe_from_local(
        &self,
        producer: &[String],
        consumer: &[String],
        cancel: &CancellationToken,
    ) -> Result<PipeOutcome, TransportError> {
        let (program, args) = producer
            .split_first()
            .ok_or_else(|| self.unavailable("empty producer command"))?;
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TransportError::Spawn {
                program: program.clone(),
                source,
            })?;
        let pid = Pid::from_raw(child.id() as i32);

        let command = shell_join(consumer);
        debug!(remote = %self.target, producer = ?producer, command = %command, "Starting remote pipeline");
        let sess = Arc::clone(&self.session);
        let mut task = tokio::task::spawn_blocking(move || pipe_blocking(&sess, child, &command));

        tokio::select! {
            joined = &mut task => {
                let (producer, consumer) = joined.map_err(|e| TransportError::Join(e.to_string()))??;
                Ok(PipeOutcome::Completed { producer, consumer })
            }
            _ = cancel.cancelled() => {
                // Ending the local stream makes the remote receive fail and close.
                if let Err(e) = kill(pid, Signal::SIGTERM) {
                    warn!(error = %e, "Failed to stop local stream producer");
                }
                let _ = task.await;
                Ok(PipeOutcome::Cancelled)
            }
        }
    }

    async fn copy_file(&self, local: &Path, dest_dir: &Path) -> Result<(), TransportError> {
        let name = local
            .file_name()
            .ok_or_else(|| self.unavailable(format!("{} has no file name", local.display())))?;
        let dest = dest_dir.join(name);
        let local = local.to_path_buf();
        let sess = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || upload_blocking(&sess, &local, &dest))
            .await
            .map_err(|e| TransportError::Join(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SshSettings {
        SshSettings::default()
    }

    #[test]
    fn test_parse_host_only() {
        let target = RemoteTarget::parse("backup.lan", None, &settings());
        assert_eq!(target.user, "root");
        assert_eq!(target.host, "backup.lan");
        assert_eq!(target.port, 22);
    }

    #[test]
    fn test_parse_user_and_port() {
        let target = RemoteTarget::parse("admin@backup.lan:2222", None, &settings());
        assert_eq!(target.user, "admin");
        assert_eq!(target.host, "backup.lan");
        assert_eq!(target.port, 2222);
    }

    #[test]
    fn test_explicit_port_wins() {
        let target = RemoteTarget::parse("backup.lan:2222", Some(2200), &settings());
        assert_eq!(target.port, 2200);
    }

    #[test]
    fn test_parse_ipv6() {
        let target = RemoteTarget::parse("[fe80::1]:2022", None, &settings());
        assert_eq!(target.host, "fe80::1");
        assert_eq!(target.port, 2022);

        let bare = RemoteTarget::parse("fe80::1", None, &settings());
        assert_eq!(bare.host, "fe80::1");
        assert_eq!(bare.port, 22);
    }

    #[test]
    fn test_display() {
        let target = RemoteTarget::parse("admin@host", Some(22), &settings());
        assert_eq!(target.to_string(), "admin@host:22");
    }
}
