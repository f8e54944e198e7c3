//! Synchronization controller - Orchestrates one run.
//!
//! For every configuration, in order:
//! - Recovery scan for snapshots left in progress by earlier runs
//! - Match the snapshot last synced to the destination
//! - Create the new snapshot, marked in progress
//! - Operator confirmation (declining deletes the new snapshot)
//! - Full or incremental transfer
//! - Tag the new snapshot complete, then delete the old one
//!
//! A failure stops only the configuration it happened in. The new snapshot
//! is left marked in progress and the old tag stays intact, so the next run
//! can pick up from the same base.

pub mod context;

use crate::notify::{Notifier, Urgency};
use crate::prompt::Prompt;
use crate::snapper::configs::Configuration;
use crate::snapper::matcher::{match_destination, Match};
use crate::snapper::metadata::DestinationRecord;
use crate::snapper::recovery::find_in_progress;
use crate::snapper::SnapshotStore;
use crate::transfer::{TransferEngine, TransferRequest};
use crate::utils::errors::{SyncError, TransferError};
use context::{validate_backupdir, ConfigReport, RunContext, RunSummary, SyncState};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct SyncController {
    store: Arc<dyn SnapshotStore>,
    engine: Arc<dyn TransferEngine>,
    prompt: Arc<dyn Prompt>,
    notifier: Notifier,
    ctx: RunContext,
    cancel_token: CancellationToken,
}

impl SyncController {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        engine: Arc<dyn TransferEngine>,
        prompt: Arc<dyn Prompt>,
        notifier: Notifier,
        ctx: RunContext,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            engine,
            prompt,
            notifier,
            ctx,
            cancel_token,
        }
    }

    /// Sync every configuration in order. Configuration failures are
    /// recorded and the run moves on; an interrupt stops the run.
    pub async fn run(&self, configs: &[Configuration]) -> RunSummary {
        let mut summary = RunSummary::default();

        for config in configs {
            if self.cancel_token.is_cancelled() {
                warn!(config = %config.name, "Interrupted, not starting remaining configurations");
                summary.interrupted = true;
                break;
            }

            let report = self.run_config(config).await;
            let interrupted = matches!(report.error, Some(SyncError::Cancelled));
            summary.reports.push(report);
            if interrupted {
                summary.interrupted = true;
                break;
            }
        }

        summary
    }

    /// Sync one configuration and report how far it got.
    pub async fn run_config(&self, config: &Configuration) -> ConfigReport {
        let mut report = ConfigReport::new(&config.name);

        if config.excluded {
            info!(config = %config.name, "Configuration excluded, skipping");
            report.state = SyncState::Skipped;
            return report;
        }

        if let Err(e) = self.sync_config(config, &mut report).await {
            error!(
                config = %config.name,
                state = %report.state,
                snapshot = ?report.snapshot,
                error = %e,
                "Backup failed"
            );
            let body = match report.snapshot {
                Some(n) if report.state != SyncState::Aborted => format!(
                    "Backup of {} failed: {}. Snapshot {} is left marked in progress.",
                    config.name, e, n
                ),
                _ => format!("Backup of {} failed: {}", config.name, e),
            };
            self.notifier.send(Urgency::Critical, "snap-sync", &body).await;
            report.error = Some(e);
        }

        report
    }

    fn transition(&self, config: &str, report: &mut ConfigReport, state: SyncState) {
        debug!(config, from = %report.state, to = %state, "State transition");
        report.state = state;
    }

    fn check_cancelled(&self) -> Result<(), SyncError> {
        if self.cancel_token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// Run an operator interaction, giving up if the run is interrupted.
    async fn interact<T>(&self, fut: impl Future<Output = std::io::Result<T>>) -> Result<T, SyncError> {
        tokio::select! {
            result = fut => result.map_err(SyncError::Prompt),
            _ = self.cancel_token.cancelled() => Err(SyncError::Cancelled),
        }
    }

    async fn sync_config(&self, config: &Configuration, report: &mut ConfigReport) -> Result<(), SyncError> {
        let name = config.name.as_str();
        let options = &self.ctx.options;
        let destination = &self.ctx.destination;

        self.report_leftovers(name).await;

        // PENDING_MATCH
        self.check_cancelled()?;
        let found = match_destination(
            self.store.as_ref(),
            name,
            &destination.id,
            &options.in_progress_marker,
        )
        .await?;

        let (previous, backupdir) = match found {
            Match::Found { number, backupdir } => {
                if let Some(requested) = &options.backupdir {
                    if requested.trim_end_matches('/') != backupdir {
                        warn!(config = name, recorded = %backupdir, requested = %requested,
                            "Ignoring --backupdir, reusing the directory recorded by the previous backup");
                    }
                }
                let root = destination.backup_root(&backupdir);
                if !self.engine.dir_exists(&root).await? {
                    return Err(SyncError::InconsistentDestination { path: root });
                }
                info!(config = name, previous = number, backupdir = %backupdir, "Found previous backup");
                (Some(number), backupdir)
            }
            Match::NotFound => {
                let backupdir = self.obtain_backupdir(name).await?;
                let root = destination.backup_root(&backupdir);
                if !self.engine.dir_exists(&root).await? {
                    info!(config = name, path = %root.display(), "Creating backup directory");
                    self.engine.create_dir(&root).await?;
                }
                info!(config = name, backupdir = %backupdir, "No previous backup, a full transfer is needed");
                (None, backupdir)
            }
        };
        report.previous = previous;

        // SNAPSHOT_CREATED
        self.check_cancelled()?;
        let number = self.store.create(name, &options.in_progress_marker).await?;
        report.snapshot = Some(number);
        self.transition(name, report, SyncState::SnapshotCreated);

        let paths = self.store.path(config, number);
        let request = TransferRequest {
            source: paths.data,
            info: paths.info,
            base: previous.map(|n| self.store.path(config, n).data),
            destination: destination.snapshot_dir(&backupdir, name, number),
        };
        report.mode = Some(request.mode());

        // AWAITING_CONFIRMATION
        if !options.noconfirm {
            self.transition(name, report, SyncState::AwaitingConfirmation);
            let question = match previous {
                Some(old) => format!(
                    "Send snapshot {} of '{}' to {} (incremental on snapshot {}) and delete snapshot {} afterwards?",
                    number,
                    name,
                    request.destination.display(),
                    old,
                    old
                ),
                None => format!(
                    "Send snapshot {} of '{}' to {} (full transfer)?",
                    number,
                    name,
                    request.destination.display()
                ),
            };
            let proceed = match self.interact(self.prompt.confirm(&question)).await {
                Ok(answer) => answer,
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    self.rollback(name, number, report).await?;
                    return Err(e);
                }
            };
            if !proceed {
                self.rollback(name, number, report).await?;
                info!(config = name, number, "Backup declined, snapshot removed");
                return Ok(());
            }
        }

        // TRANSFERRING
        self.check_cancelled()?;
        self.transition(name, report, SyncState::Transferring);
        let mode = self
            .engine
            .transfer(&request, &self.cancel_token)
            .await
            .map_err(|e| match e {
                TransferError::Cancelled => SyncError::Cancelled,
                other => SyncError::Transfer(other),
            })?;

        // TAGGED
        self.check_cancelled()?;
        let record = DestinationRecord {
            destination: destination.id.clone(),
            backupdir: backupdir.clone(),
        };
        self.store
            .tag(name, number, &options.description, &record.to_metadata())
            .await?;
        self.transition(name, report, SyncState::Tagged);

        // OLD_DELETED
        if let Some(old) = previous {
            self.store.delete(name, old).await?;
            self.transition(name, report, SyncState::OldDeleted);
        }

        info!(config = name, number, mode = %mode, destination = %request.destination.display(), "Backup complete");
        self.notifier
            .send(
                Urgency::Normal,
                "snap-sync",
                &format!("{} backup of {} complete (snapshot {})", mode, name, number),
            )
            .await;
        Ok(())
    }

    /// Remove the snapshot this run created; nothing else is touched.
    async fn rollback(&self, config: &str, number: u32, report: &mut ConfigReport) -> Result<(), SyncError> {
        self.store.delete(config, number).await?;
        self.transition(config, report, SyncState::Aborted);
        Ok(())
    }

    async fn report_leftovers(&self, config: &str) {
        match find_in_progress(self.store.as_ref(), config, &self.ctx.options.in_progress_marker).await {
            Ok(numbers) if numbers.is_empty() => {}
            Ok(numbers) => {
                warn!(
                    config,
                    count = numbers.len(),
                    snapshots = ?numbers,
                    "Found snapshots left in progress by earlier failed runs; inspect and delete them with snapper"
                );
                self.notifier
                    .send(
                        Urgency::Normal,
                        "snap-sync",
                        &format!(
                            "{} earlier failed backup attempt(s) found for {}",
                            numbers.len(),
                            config
                        ),
                    )
                    .await;
            }
            Err(e) => warn!(config, error = %e, "Could not check for earlier failed runs"),
        }
    }

    /// Backup directory for a first sync: command line, then prompt, then settings.
    async fn obtain_backupdir(&self, config: &str) -> Result<String, SyncError> {
        let options = &self.ctx.options;
        if let Some(dir) = &options.backupdir {
            return validate_backupdir(dir);
        }

        if !options.noconfirm {
            let question = format!(
                "No previous backup of '{}' on {}. Directory for backups, relative to the mount (created if absent){}",
                config,
                self.ctx.destination.mount.display(),
                options
                    .default_backupdir
                    .as_deref()
                    .map(|d| format!(" [{}]", d))
                    .unwrap_or_default()
            );
            let answer = self.interact(self.prompt.ask(&question)).await?;
            if !answer.is_empty() {
                return validate_backupdir(&answer);
            }
        }

        match &options.default_backupdir {
            Some(dir) => validate_backupdir(dir),
            None => Err(SyncError::MissingBackupDir {
                config: config.to_string(),
            }),
        }
    }
}
