//! Best-effort desktop notifications.
//!
//! snap-sync runs as root, usually via sudo, so notifications are delivered
//! to the invoking user's session bus when `SUDO_USER`/`SUDO_UID` are set.
//! Failures are logged and otherwise ignored.

use crate::config::NotifySettings;
use crate::transport::{argv, LocalTransport, Transport};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Low,
    Normal,
    Critical,
}

impl Urgency {
    fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::Critical => "critical",
        }
    }
}

/// The desktop user a notification is delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SessionUser {
    name: String,
    uid: String,
}

#[derive(Debug, Clone)]
pub struct Notifier {
    enabled: bool,
    bin: String,
    user: Option<SessionUser>,
}

impl Notifier {
    /// Quiet mode disables delivery; messages still reach the log.
    pub fn from_env(settings: &NotifySettings, quiet: bool) -> Self {
        let user = match (std::env::var("SUDO_USER"), std::env::var("SUDO_UID")) {
            (Ok(name), Ok(uid)) if !name.is_empty() && name != "root" => Some(SessionUser { name, uid }),
            _ => None,
        };
        Self {
            enabled: settings.enabled && !quiet,
            bin: settings.notify_bin.clone(),
            user,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            bin: String::new(),
            user: None,
        }
    }

    fn command(&self, urgency: Urgency, summary: &str, body: &str) -> Vec<String> {
        let urgency = format!("--urgency={}", urgency.as_str());
        let notify = argv([self.bin.as_str(), "--app-name=snap-sync", urgency.as_str(), summary, body]);
        match &self.user {
            Some(user) => {
                let bus = format!("DBUS_SESSION_BUS_ADDRESS=unix:path=/run/user/{}/bus", user.uid);
                let mut cmd = argv(["sudo", "-u", user.name.as_str(), "env", bus.as_str()]);
                cmd.extend(notify);
                cmd
            }
            None => notify,
        }
    }

    fn failure_command(&self, error: &(dyn std::fmt::Display + Sync)) -> Vec<String> {
        self.command(Urgency::Critical, "snap-sync", &format!("snap-sync failed: {}", error))
    }

    /// Report an error that ended the run before or between configurations.
    pub async fn send_failure(&self, error: &(dyn std::fmt::Display + Sync)) {
        if self.enabled {
            self.deliver(self.failure_command(error)).await;
        }
    }

    pub async fn send(&self, urgency: Urgency, summary: &str, body: &str) {
        if !self.enabled {
            return;
        }
        self.deliver(self.command(urgency, summary, body)).await;
    }

    async fn deliver(&self, cmd: Vec<String>) {
        match LocalTransport::new().run(&cmd).await {
            Ok(out) if out.success() => {}
            Ok(out) => debug!(reason = %out.failure_reason(), "Desktop notification failed"),
            Err(e) => debug!(error = %e, "Desktop notification unavailable"),
        }
    }
}
