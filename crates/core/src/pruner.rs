//! Deletes consumed change-log rows from the source database.

use std::time::Duration;

use tracing::{debug, error, info};

use crate::db::Database;

/// Outcome of pruning one set of ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub pruned: usize,
    pub failed_batches: usize,
    /// Ids left in the log because their batch failed.
    pub failed_ids: Vec<i64>,
}

/// Removes change-log ids in fixed-size batches. A failed batch is logged
/// and left for the next cycle; it is never retried within this one.
pub struct Pruner<'a> {
    db: &'a Database,
    log_table: &'a str,
    batch_size: usize,
    chunk_delay: Duration,
}

impl<'a> Pruner<'a> {
    pub fn new(db: &'a Database, log_table: &'a str, batch_size: usize, chunk_delay: Duration) -> Self {
        Self {
            db,
            log_table,
            batch_size: batch_size.max(1),
            chunk_delay,
        }
    }

    pub async fn prune(&self, ids: &[i64]) -> PruneReport {
        let mut report = PruneReport::default();
        for (idx, batch) in ids.chunks(self.batch_size).enumerate() {
            if idx > 0 && !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
            match self.db.delete_change_log_ids(self.log_table, batch) {
                Ok(removed) => {
                    debug!(batch = idx, ids = batch.len(), removed, "pruned change-log batch");
                    report.pruned += removed;
                }
                Err(e) => {
                    error!(batch = idx, ids = batch.len(), error = %e, "failed to prune change-log batch");
                    report.failed_batches += 1;
                    report.failed_ids.extend_from_slice(batch);
                }
            }
        }
        if !ids.is_empty() {
            info!(
                pruned = report.pruned,
                failed_batches = report.failed_batches,
                "change log pruned"
            );
        }
        report
    }
}
