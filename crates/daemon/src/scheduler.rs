//! Sync scheduler that runs sync cycles on a configurable interval until
//! shutdown is requested.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

use marketsync_core::models::CycleReport;
use marketsync_core::sync_engine::SyncEngine;

/// Tracks aggregate statistics across sync cycles.
pub struct SchedulerStats {
    pub total_cycles: AtomicU64,
    pub degraded_cycles: AtomicU64,
    pub total_errors: AtomicU64,
    pub consecutive_errors: AtomicU64,
}

impl SchedulerStats {
    fn new() -> Self {
        Self {
            total_cycles: AtomicU64::new(0),
            degraded_cycles: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            consecutive_errors: AtomicU64::new(0),
        }
    }
}

/// The sync scheduler.
///
/// Runs one cycle immediately, then one per `poll_interval`. A cycle that
/// overruns the interval delays the next tick instead of queuing extra
/// cycles.
pub struct Scheduler {
    sync_engine: Arc<SyncEngine>,
    poll_interval: Duration,
    stats: Arc<SchedulerStats>,
}

impl Scheduler {
    pub fn new(sync_engine: Arc<SyncEngine>, poll_interval: Duration) -> Self {
        Self {
            sync_engine,
            poll_interval,
            stats: Arc::new(SchedulerStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        self.stats.clone()
    }

    /// Main scheduler loop. Returns once `shutdown` is notified; a cycle in
    /// progress is allowed to finish first.
    pub async fn run(&mut self, shutdown: Arc<Notify>) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "scheduler started"
        );

        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.notified() => {
                    info!("scheduler received shutdown");
                    break;
                }
            }
        }

        info!(
            total_cycles = self.stats.total_cycles.load(Ordering::SeqCst),
            total_errors = self.stats.total_errors.load(Ordering::SeqCst),
            "scheduler stopped"
        );
    }

    async fn run_cycle(&self) {
        let cycle_num = self.stats.total_cycles.fetch_add(1, Ordering::SeqCst) + 1;
        info!(cycle = cycle_num, "starting sync cycle");

        match self.sync_engine.run_cycle().await {
            Ok(report) => {
                log_cycle_report(&report);
                if report.has_errors() {
                    let consecutive =
                        self.stats.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
                    self.stats.degraded_cycles.fetch_add(1, Ordering::SeqCst);
                    warn!(
                        cycle = cycle_num,
                        consecutive_errors = consecutive,
                        "sync cycle completed with dataset errors"
                    );
                } else {
                    self.stats.consecutive_errors.store(0, Ordering::SeqCst);
                }
            }
            Err(e) => {
                let errors = self.stats.total_errors.fetch_add(1, Ordering::SeqCst) + 1;
                let consecutive =
                    self.stats.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
                error!(
                    cycle = cycle_num,
                    error = %e,
                    total_errors = errors,
                    consecutive_errors = consecutive,
                    "sync cycle failed"
                );
            }
        }

        match self.sync_engine.pending_changes() {
            Ok(pending) if pending > 0 => info!(pending, "change-log rows still pending"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not count pending change-log rows"),
        }
    }
}

/// Log one line per dataset of a finished cycle.
pub fn log_cycle_report(report: &CycleReport) {
    for entity in &report.entities {
        match &entity.error {
            Some(err) => error!(
                entity = %entity.dataset,
                mode = %entity.mode,
                consumed = entity.consumed,
                error = %err,
                "dataset failed"
            ),
            None if entity.is_degraded() => warn!(
                entity = %entity.dataset,
                mode = %entity.mode,
                inserted = entity.inserted,
                deleted = entity.deleted,
                failed_rows = entity.failed_rows,
                prune_failed_batches = entity.prune_failed_batches,
                prune_deferred = entity.prune_deferred,
                "dataset synced with losses"
            ),
            None => info!(
                entity = %entity.dataset,
                mode = %entity.mode,
                consumed = entity.consumed,
                inserted = entity.inserted,
                updated = entity.updated,
                deleted = entity.deleted,
                skipped = entity.skipped,
                pruned = entity.pruned,
                "dataset synced"
            ),
        }
    }
    if let Some(done) = report.completed_at {
        let elapsed_ms = (done - report.started_at).num_milliseconds();
        info!(cycle_id = %report.cycle_id, elapsed_ms, "cycle summary logged");
    }
}
