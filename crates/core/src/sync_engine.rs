//! One-way ERP to remote synchronization engine.
//!
//! The [`SyncEngine`] runs each cycle over every enabled dataset in
//! [`Dataset::CYCLE_ORDER`]:
//!
//! 1. Change-log datasets: classify pending log rows, apply deletes and
//!    upserts remotely, prune the consumed log rows.
//! 2. Full-snapshot datasets: diff the whole local extent against the whole
//!    remote extent and apply the difference.
//!
//! A lock mechanism prevents concurrent sync cycles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::applier::{ApplyReport, Applier};
use crate::classifier::Classifier;
use crate::config::{AppConfig, EntitySettings, PruneGate};
use crate::db::Database;
use crate::errors::SyncError;
use crate::gateway::{CommandGateway, SqlValue};
use crate::models::{CycleReport, Dataset, EntityKind, EntityReport, SyncMode};
use crate::pruner::{PruneReport, Pruner};
use crate::reconciler::Reconciler;
use crate::records::{
    table_for, BalanceRecord, BarcodeRecord, CustomerRecord, EntitySnapshot, InventoryRecord,
    PriceFormulaRecord, PriceRecord, SyncRecord,
};

/// The change-log / snapshot sync engine.
pub struct SyncEngine {
    config: AppConfig,
    db: Database,
    gateway: Arc<dyn CommandGateway>,
    /// Atomic flag preventing concurrent sync cycles.
    running: Arc<AtomicBool>,
    started_at: chrono::DateTime<Utc>,
}

impl SyncEngine {
    pub fn new(config: AppConfig, db: Database, gateway: Arc<dyn CommandGateway>) -> Self {
        info!("initializing sync engine");
        Self {
            config,
            db,
            gateway,
            running: Arc::new(AtomicBool::new(false)),
            started_at: Utc::now(),
        }
    }

    /// Return a reference to the source database.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Return a reference to the configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if a sync cycle is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Change-log rows still waiting to be processed.
    pub fn pending_changes(&self) -> Result<i64, SyncError> {
        Ok(self.db.count_change_log(&self.config.source.change_log_table)?)
    }

    // -----------------------------------------------------------------------
    // Main entry point
    // -----------------------------------------------------------------------

    /// Execute one full sync cycle.
    ///
    /// A hard error in one dataset is recorded in its [`EntityReport`] and the
    /// cycle moves on, unless `sync.halt_on_entity_error` is set, in which
    /// case the error is returned.
    ///
    /// The sync lock is released via a drop guard so it is freed even if
    /// the cycle panics.
    pub async fn run_cycle(&self) -> Result<CycleReport, SyncError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning {
                started_at: self.started_at.to_rfc3339(),
            });
        }

        // RAII guard that clears the running flag on drop (even on panic).
        let _guard = SyncLockGuard(self.running.clone());

        let mut cycle = CycleReport::start();
        info!(cycle_id = %cycle.cycle_id, "sync cycle started");

        for dataset in Dataset::CYCLE_ORDER {
            let settings = self.config.entities.settings(dataset);
            if !settings.enabled {
                debug!(entity = %dataset, "dataset disabled, skipping");
                continue;
            }

            let mut report = EntityReport::new(dataset, settings.mode);
            let result = match settings.mode {
                SyncMode::ChangeLog => match dataset.entity_kind() {
                    Some(kind) => self.sync_change_log(kind, &settings, &mut report).await,
                    None => self.sync_full_snapshot(dataset, &settings, &mut report).await,
                },
                SyncMode::FullSnapshot => self.sync_full_snapshot(dataset, &settings, &mut report).await,
            };

            if let Err(e) = result {
                error!(entity = %dataset, error = %e, "dataset sync failed");
                report.error = Some(e.to_string());
                cycle.entities.push(report);
                if self.config.sync.halt_on_entity_error {
                    return Err(e);
                }
                continue;
            }
            cycle.entities.push(report);
        }

        cycle.completed_at = Some(Utc::now());
        info!(
            cycle_id = %cycle.cycle_id,
            datasets = cycle.entities.len(),
            errors = cycle.entities.iter().filter(|e| e.error.is_some()).count(),
            "sync cycle finished"
        );
        Ok(cycle)
    }

    fn applier(&self) -> Applier<'_> {
        Applier::new(self.gateway.as_ref(), self.config.sync.chunk_delay())
    }

    fn pruner(&self) -> Pruner<'_> {
        Pruner::new(
            &self.db,
            &self.config.source.change_log_table,
            self.config.sync.prune_batch_size,
            self.config.sync.chunk_delay(),
        )
    }

    // -----------------------------------------------------------------------
    // Change-log path
    // -----------------------------------------------------------------------

    async fn sync_change_log(
        &self,
        kind: EntityKind,
        settings: &EntitySettings,
        report: &mut EntityReport,
    ) -> Result<(), SyncError> {
        let classification =
            Classifier::new(&self.db, &self.config.source.change_log_table).classify(kind)?;
        report.consumed = classification.consumed_ids.len();
        report.skipped = classification.skipped;

        if classification.consumed_ids.is_empty() {
            return Ok(());
        }
        if classification.is_noop() {
            // Every row vanished; nothing to send.
            record_prune(report, self.pruner().prune(&classification.consumed_ids).await);
            return Ok(());
        }

        let entity = kind.to_string();
        let table = table_for(kind);
        let rows: Vec<Vec<SqlValue>> = classification
            .inserts
            .iter()
            .map(EntitySnapshot::values)
            .collect();

        let applier = self.applier();
        match self.config.sync.prune_gate {
            PruneGate::AfterClassify => {
                record_prune(report, self.pruner().prune(&classification.consumed_ids).await);
                applier.ensure_table(table).await?;
                let applied = applier
                    .apply(&entity, table, &classification.delete_keys, &rows, settings)
                    .await?;
                record_apply(report, applied);
            }
            PruneGate::AfterApply => {
                let result = match applier.ensure_table(table).await {
                    Ok(()) => {
                        applier
                            .apply(&entity, table, &classification.delete_keys, &rows, settings)
                            .await
                    }
                    Err(e) => Err(e),
                };
                match result {
                    Ok(applied) if applied.is_clean() => {
                        record_apply(report, applied);
                        record_prune(
                            report,
                            self.pruner().prune(&classification.consumed_ids).await,
                        );
                    }
                    Ok(applied) => {
                        record_apply(report, applied);
                        report.prune_deferred = classification.consumed_ids.len();
                        warn!(
                            entity = %kind,
                            failed_chunks = applied.failed_chunks,
                            deferred = report.prune_deferred,
                            "apply incomplete, change-log rows kept for next cycle"
                        );
                    }
                    Err(e) => {
                        report.prune_deferred = classification.consumed_ids.len();
                        warn!(
                            entity = %kind,
                            deferred = report.prune_deferred,
                            "apply failed, change-log rows kept for next cycle"
                        );
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Full-snapshot path
    // -----------------------------------------------------------------------

    async fn sync_full_snapshot(
        &self,
        dataset: Dataset,
        settings: &EntitySettings,
        report: &mut EntityReport,
    ) -> Result<(), SyncError> {
        match dataset {
            Dataset::Price => self.reconcile_as::<PriceRecord>(dataset, settings, report).await,
            Dataset::Inventory => {
                self.reconcile_as::<InventoryRecord>(dataset, settings, report).await
            }
            Dataset::ProductBarcode => {
                self.reconcile_as::<BarcodeRecord>(dataset, settings, report).await
            }
            Dataset::Customer => {
                self.reconcile_as::<CustomerRecord>(dataset, settings, report).await
            }
            Dataset::PriceFormula => {
                self.reconcile_as::<PriceFormulaRecord>(dataset, settings, report).await
            }
            Dataset::Balance => self.reconcile_as::<BalanceRecord>(dataset, settings, report).await,
        }
    }

    /// Reconcile one dataset. For change-log entities the log rows present
    /// before the extent was read are pruned once the remote matches.
    async fn reconcile_as<R: SyncRecord>(
        &self,
        dataset: Dataset,
        settings: &EntitySettings,
        report: &mut EntityReport,
    ) -> Result<(), SyncError> {
        let log_table = &self.config.source.change_log_table;
        let pending: Vec<i64> = match dataset.entity_kind() {
            Some(kind) => self
                .db
                .fetch_change_log(log_table, kind)?
                .into_iter()
                .map(|r| r.id)
                .collect(),
            None => Vec::new(),
        };
        report.consumed = pending.len();

        let applier = self.applier();
        applier.ensure_table(R::TABLE).await?;
        let reconciler = Reconciler::new(
            &self.db,
            self.gateway.as_ref(),
            self.config.sync.page_size,
            self.config.sync.epsilon,
        );
        let entity = dataset.to_string();
        let result = reconciler.reconcile::<R>(&applier, &entity, settings).await?;

        report.inserted = result.inserted;
        report.updated = result.updated;
        report.deleted = result.apply.deleted;
        report.failed_rows = result.apply.failed_rows;

        if pending.is_empty() {
            return Ok(());
        }
        if result.apply.is_clean() {
            record_prune(report, self.pruner().prune(&pending).await);
        } else {
            report.prune_deferred = pending.len();
        }
        Ok(())
    }
}

fn record_apply(report: &mut EntityReport, applied: ApplyReport) {
    report.inserted = applied.upserted;
    report.deleted = applied.deleted;
    report.failed_rows = applied.failed_rows;
}

fn record_prune(report: &mut EntityReport, pruned: PruneReport) {
    report.pruned += pruned.pruned;
    report.prune_failed_batches += pruned.failed_batches;
}

/// Drop guard that resets the `running` flag to `false`.
///
/// This ensures the sync lock is always released, even if a sync cycle panics.
struct SyncLockGuard(Arc<AtomicBool>);

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
