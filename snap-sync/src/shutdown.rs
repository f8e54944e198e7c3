//! Interrupt handling for SIGINT, SIGTERM and SIGHUP.
//!
//! The first signal cancels the run token: the transfer pipeline is torn
//! down and no further snapshot writes happen. A second signal exits
//! immediately.

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Exit status used when a second interrupt forces termination.
pub const FORCED_EXIT_CODE: i32 = 130;

pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled on the first interrupt.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Start listening for interrupts in the background.
    pub fn install(&self) -> std::io::Result<()> {
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut hangup = signal(SignalKind::hangup())?;
        let token = self.token.clone();

        tokio::spawn(async move {
            let name = next_signal(&mut interrupt, &mut terminate, &mut hangup).await;
            warn!(signal = name, "Interrupted, stopping after cleanup (signal again to force exit)");
            token.cancel();

            let name = next_signal(&mut interrupt, &mut terminate, &mut hangup).await;
            warn!(signal = name, "Second interrupt, exiting now");
            std::process::exit(FORCED_EXIT_CODE);
        });
        Ok(())
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

async fn next_signal(interrupt: &mut Signal, terminate: &mut Signal, hangup: &mut Signal) -> &'static str {
    tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{kill, Signal as NixSignal};
    use nix::unistd::Pid;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_cancels_token() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.install().unwrap();
        let token = coordinator.token();
        assert!(!token.is_cancelled());

        kill(Pid::this(), NixSignal::SIGHUP).unwrap();
        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .expect("token was not cancelled");
    }
}
