//! update-schedulerd entry point.
//!
//! Loads the configuration, probes the orchestrator, and runs the
//! reconciliation loop until SIGINT or SIGTERM. SIGHUP requests an
//! immediate cycle.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use update_schedulerd::audit::{init_logging, AuditCategory, AuditOutcome, AuditRecord};
use update_schedulerd::config::DEFAULT_CONFIG_PATH;
use update_schedulerd::desired::build_source;
use update_schedulerd::orchestrator::build_client;
use update_schedulerd::{
    audit_log, CycleReport, SchedulerClock, SchedulerConfig, Trigger, TriggerHandle,
    UpdateScheduler,
};

/// Periodic update-scheduling controller
#[derive(Parser, Debug)]
#[command(name = "update-schedulerd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short = 'c', long, env = "UPDATE_SCHEDULER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Run a single reconciliation cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("update-schedulerd: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = SchedulerConfig::load_or_default(&args.config)?;
    config.validate()?;

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, config.logging.json).context("Failed to initialize logging")?;

    info!(
        config = %args.config.display(),
        interval_secs = config.scheduler.interval_secs,
        workers = config.executor.worker_pool_size,
        max_actions = config.executor.max_actions_per_cycle,
        "Starting update-schedulerd"
    );

    let client = build_client(&config)?;
    client
        .probe()
        .await
        .with_context(|| format!("{} orchestrator API unreachable", client.backend()))?;

    let desired = build_source(&config.desired).await?;
    info!(source = %desired.describe(), "Desired-state source ready");

    let scheduler = Arc::new(UpdateScheduler::from_config(&config, client, desired));
    let cancel = CancellationToken::new();

    let record = AuditRecord::new(AuditCategory::SystemLifecycle, "update-schedulerd", "start")
        .with_outcome(AuditOutcome::Success)
        .with_details(serde_json::json!({
            "once": args.once,
            "interval_secs": config.scheduler.interval_secs,
        }));
    audit_log!(record);

    if args.once {
        let signals = spawn_signal_watcher(cancel.clone(), None)?;
        let report = scheduler.run_cycle(Trigger::Manual, &cancel).await;
        signals.abort();
        match report {
            CycleReport::Skipped { reason, .. } => warn!(%reason, "Single cycle skipped"),
            CycleReport::Completed { outcomes, .. } => info!(
                succeeded = outcomes.succeeded(),
                failed = outcomes.failed(),
                cancelled = outcomes.cancelled,
                "Single cycle finished"
            ),
        }
    } else {
        let clock = SchedulerClock::new(config.interval(), config.debounce());
        let stats = clock.stats();
        let signals = spawn_signal_watcher(cancel.clone(), Some(clock.trigger_handle()))?;

        clock.run(scheduler.clone(), cancel.clone()).await;
        signals.abort();

        info!(
            fired = stats.fired(),
            coalesced = stats.coalesced(),
            triggers = stats.triggers(),
            "Scheduler clock stopped"
        );
    }

    for line in scheduler.dump() {
        info!("{}", line);
    }

    let record = AuditRecord::new(AuditCategory::SystemLifecycle, "update-schedulerd", "stop")
        .with_outcome(AuditOutcome::Success);
    audit_log!(record);

    info!("update-schedulerd shutdown complete");
    Ok(())
}

/// Cancels on SIGINT/SIGTERM; SIGHUP fires `trigger` when one is given.
#[cfg(unix)]
fn spawn_signal_watcher(
    cancel: CancellationToken,
    trigger: Option<TriggerHandle>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    warn!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = terminate.recv() => {
                    warn!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = hangup.recv() => match &trigger {
                    Some(trigger) => {
                        info!("Received SIGHUP, requesting reconcile");
                        let record = AuditRecord::new(
                            AuditCategory::AdminAction,
                            "update-schedulerd",
                            "manual_trigger",
                        )
                        .with_outcome(AuditOutcome::Success);
                        audit_log!(record);
                        trigger.trigger();
                    }
                    None => info!("Received SIGHUP, ignored in single-cycle mode"),
                },
            }
        }
        cancel.cancel();
    }))
}

#[cfg(not(unix))]
fn spawn_signal_watcher(
    cancel: CancellationToken,
    _trigger: Option<TriggerHandle>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received ctrl-c, shutting down gracefully");
        }
        cancel.cancel();
    }))
}
