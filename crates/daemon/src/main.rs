//! marketsync daemon entry point.
//!
//! Loads configuration, opens the source database, builds the remote
//! gateway, and either runs a single sync cycle or the polling scheduler
//! with graceful shutdown.

mod scheduler;
mod signals;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use marketsync_core::config::{AppConfig, GatewayKind};
use marketsync_core::db::Database;
use marketsync_core::gateway;
use marketsync_core::sync_engine::SyncEngine;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// marketsync synchronization daemon.
#[derive(Parser, Debug)]
#[command(
    name = "marketsync-daemon",
    version,
    about = "Mirror ERP master data into a remote store"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Run a single sync cycle and exit.
    #[arg(long)]
    once: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load, resolve, and validate configuration
    let config =
        AppConfig::load_and_resolve(&args.config).context("failed to load configuration")?;

    // Initialize tracing
    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.daemon.log_level.clone());

    let filter = EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    // Startup banner
    info!("========================================");
    info!("  marketsync daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", args.config.display());
    info!("Source DB     : {}", config.source.path.display());
    info!("Change log    : {}", config.source.change_log_table);
    let gateway_target = match config.gateway.kind {
        GatewayKind::Http => config.gateway.base_url.clone(),
        GatewayKind::Sqlite => config
            .gateway
            .sqlite_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
    };
    info!("Gateway       : {:?} {}", config.gateway.kind, gateway_target);
    info!("Param mode    : {:?}", config.gateway.param_mode);
    info!("Prune gate    : {:?}", config.sync.prune_gate);
    info!("Poll interval : {}s", config.daemon.poll_interval_secs);
    info!("Log level     : {}", log_level);
    info!("========================================");

    // Open the source database
    let db = Database::new(&config.source.path).context("failed to open source database")?;
    info!("Source database opened at {}", config.source.path.display());

    // Build the remote gateway
    let remote = gateway::from_config(&config.gateway).context("failed to build gateway")?;
    info!("Gateway initialized");

    let poll_interval = std::time::Duration::from_secs(config.daemon.poll_interval_secs);
    let sync_engine = Arc::new(SyncEngine::new(config, db, remote));
    info!("Sync engine initialized");

    if args.once {
        let report = sync_engine
            .run_cycle()
            .await
            .context("sync cycle failed")?;
        scheduler::log_cycle_report(&report);
        if report.has_errors() {
            bail!("sync cycle finished with dataset errors");
        }
        info!("marketsync single cycle complete.");
        return Ok(());
    }

    // Create a shutdown notify for cooperative cancellation
    let shutdown = Arc::new(tokio::sync::Notify::new());
    let scheduler_shutdown = shutdown.clone();

    let mut sched = scheduler::Scheduler::new(sync_engine.clone(), poll_interval);
    let stats = sched.stats();

    // Start the scheduler in a background task
    let scheduler_handle = tokio::spawn(async move {
        sched.run(scheduler_shutdown).await;
    });

    // Wait for shutdown signal
    signals::wait_for_shutdown().await;

    info!("Shutdown signal received, stopping...");

    // Stores a permit, so a scheduler busy in a cycle still sees it
    shutdown.notify_one();

    // Wait for the scheduler to finish its current cycle (up to 10s)
    match tokio::time::timeout(std::time::Duration::from_secs(10), scheduler_handle).await {
        Ok(Ok(())) => info!("scheduler stopped gracefully"),
        Ok(Err(e)) => warn!("scheduler task error: {}", e),
        Err(_) => warn!("scheduler did not stop within 10s, forcing shutdown"),
    }

    info!(
        cycles = stats.total_cycles.load(Ordering::SeqCst),
        degraded = stats.degraded_cycles.load(Ordering::SeqCst),
        errors = stats.total_errors.load(Ordering::SeqCst),
        "marketsync daemon stopped."
    );
    Ok(())
}
