//! snap-sync - Main entry point
//!
//! Sends snapper snapshots to another btrfs volume, incrementally when a
//! previous backup to that volume exists.

use anyhow::{bail, Context, Result};
use clap::Parser;
use snap_sync::config::Settings;
use snap_sync::executor::context::{Destination, RunContext, RunOptions, RunSummary};
use snap_sync::executor::SyncController;
use snap_sync::notify::{Notifier, Urgency};
use snap_sync::prompt::{Prompt, TerminalPrompt};
use snap_sync::shutdown::ShutdownCoordinator;
use snap_sync::snapper::{configs, Snapper};
use snap_sync::transfer::BtrfsTransfer;
use snap_sync::transport::{LocalTransport, RemoteTarget, SshTransport, Transport};
use snap_sync::utils::errors::ResolveError;
use snap_sync::utils::{self, SyncError};
use snap_sync::volume::{self, Volume};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Description set on the snapshot once the backup completes
    #[arg(short, long)]
    description: Option<String>,

    /// Snapper configuration to back up (repeatable; default: all configured)
    #[arg(short, long = "config", value_name = "NAME")]
    config: Vec<String>,

    /// Identifier (UUID) of the destination btrfs volume
    #[arg(short, long)]
    uuid: Option<String>,

    /// Subvolume id narrowing the destination when several mounts share a UUID
    #[arg(short, long)]
    subvolid: Option<String>,

    /// Backup directory relative to the destination mount, used on first backup
    #[arg(short, long)]
    backupdir: Option<String>,

    /// Do not ask for confirmation
    #[arg(short, long)]
    noconfirm: bool,

    /// Do not send desktop notifications
    #[arg(short, long)]
    quiet: bool,

    /// Send to a remote host: [user@]host[:port]
    #[arg(short, long, value_name = "HOST")]
    remote: Option<String>,

    /// SSH port for --remote
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to settings file
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Load settings
    let settings = match Settings::load(args.settings.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("snap-sync: {}", e);
            Notifier::from_env(&Settings::default().notify, args.quiet)
                .send_failure(&e.to_string())
                .await;
            return ExitCode::FAILURE;
        }
    };
    let notifier = Notifier::from_env(&settings.notify, args.quiet);

    match run(args, settings, &notifier).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("snap-sync: {:#}", e);
            notifier.send_failure(&format!("{:#}", e)).await;
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, settings: Settings, notifier: &Notifier) -> Result<ExitCode> {
    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&settings.log.level);
    utils::logger::init(log_level)?;

    info!("Starting snap-sync v{}", env!("CARGO_PKG_VERSION"));

    if !nix::unistd::Uid::effective().is_root() {
        return Err(SyncError::Setup("snap-sync must be run as root".into()).into());
    }

    let configurations = configs::load_configurations(
        settings.global_config_path(),
        &settings.snapper.global_config,
        &settings.snapper.configs_dir,
        &args.config,
    )
    .map_err(SyncError::from)?;

    let shutdown = ShutdownCoordinator::new();
    shutdown.install().context("Failed to install signal handlers")?;
    let cancel_token = shutdown.token();

    // Destination-side commands go through SSH when --remote is given
    let destination_transport: Arc<dyn Transport> = match &args.remote {
        Some(spec) => {
            let target = RemoteTarget::parse(spec, args.port, &settings.ssh);
            Arc::new(
                SshTransport::connect(target, &settings.ssh)
                    .await
                    .map_err(|e| SyncError::Setup(e.to_string()))?,
            )
        }
        None => Arc::new(LocalTransport::new()),
    };
    let prompt: Arc<dyn Prompt> = Arc::new(TerminalPrompt::new());

    let volume = match select_destination(&args, destination_transport.as_ref(), prompt.as_ref()).await? {
        Some(volume) => volume,
        None => {
            info!("No destination selected, exiting");
            return Ok(ExitCode::SUCCESS);
        }
    };
    info!(
        destination = %volume,
        via = %destination_transport.describe(),
        configs = configurations.len(),
        "Destination selected"
    );

    let ctx = RunContext {
        destination: Destination::from(volume),
        options: RunOptions {
            description: args
                .description
                .clone()
                .unwrap_or_else(|| settings.backup.description.clone()),
            in_progress_marker: settings.backup.in_progress_marker.clone(),
            backupdir: args.backupdir.clone(),
            default_backupdir: settings.backup.default_backupdir.clone(),
            noconfirm: args.noconfirm,
        },
    };

    let controller = SyncController::new(
        Arc::new(Snapper::new(
            settings.snapper.snapper_bin.clone(),
            Arc::new(LocalTransport::new()),
        )),
        Arc::new(BtrfsTransfer::new(
            settings.snapper.btrfs_bin.clone(),
            destination_transport.clone(),
        )),
        prompt,
        notifier.clone(),
        ctx,
        cancel_token,
    );

    let summary = controller.run(&configurations).await;
    log_summary(&summary);

    if summary.success() {
        if summary.completed() > 0 {
            notifier.send(Urgency::Low, "snap-sync", "All backups complete").await;
        }
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Resolve the destination volume by identifier, or let the operator pick one.
/// `None` means the operator chose to exit.
async fn select_destination(
    args: &Args,
    transport: &dyn Transport,
    prompt: &dyn Prompt,
) -> Result<Option<Volume>> {
    let volumes = volume::list_volumes(transport).await.map_err(SyncError::from)?;
    if volumes.is_empty() {
        return Err(SyncError::from(ResolveError::NoVolumes).into());
    }

    if let Some(uuid) = &args.uuid {
        let volume = volume::resolve(&volumes, uuid, args.subvolid.as_deref()).map_err(SyncError::from)?;
        return Ok(Some(volume));
    }
    if args.noconfirm {
        bail!("--uuid is required with --noconfirm");
    }
    if args.subvolid.is_some() {
        warn!("--subvolid has no effect without --uuid");
    }

    let choice = prompt
        .select_volume(&volumes)
        .await
        .context("Failed to read volume selection")?;
    Ok(choice.and_then(|i| volumes.get(i).cloned()))
}

fn log_summary(summary: &RunSummary) {
    for report in &summary.reports {
        match &report.error {
            Some(e) => error!(
                config = %report.config,
                state = %report.state,
                snapshot = ?report.snapshot,
                error = %e,
                "Backup failed"
            ),
            None => info!(
                config = %report.config,
                state = %report.state,
                snapshot = ?report.snapshot,
                mode = ?report.mode,
                "Backup finished"
            ),
        }
    }
    if summary.interrupted {
        warn!("Run interrupted before all configurations were processed");
    }
    let failed = summary.reports.iter().filter(|r| r.failed()).count();
    info!(
        processed = summary.reports.len(),
        failed,
        "Run complete"
    );
}
