//! Turns pending change-log records into remote writes.
//!
//! For one entity kind the [`Classifier`] drains the change log, reads the
//! current snapshot of every inserted or updated row, and produces the set
//! of upserts and `row_ref` deletes that bring the remote table in line.
//! It never talks to the remote.

use std::collections::HashSet;

use tracing::{debug, info, instrument, warn};

use crate::db::Database;
use crate::errors::SyncError;
use crate::models::{ChangeOp, EntityKind};
use crate::records::{dedupe_last_wins, EntitySnapshot};

/// Result of draining the change log for one entity kind.
#[derive(Debug, Clone)]
pub struct Classification {
    pub kind: EntityKind,
    /// Every change-log id read, including skipped ones.
    pub consumed_ids: Vec<i64>,
    /// Snapshots to upsert, at most one per natural key.
    pub inserts: Vec<EntitySnapshot>,
    /// `row_order_ref` values to delete remotely, each at most once.
    pub delete_keys: Vec<i64>,
    /// Inserts or updates whose source row vanished before it was read.
    pub skipped: usize,
}

impl Classification {
    fn empty(kind: EntityKind) -> Self {
        Self {
            kind,
            consumed_ids: Vec::new(),
            inserts: Vec::new(),
            delete_keys: Vec::new(),
            skipped: 0,
        }
    }

    /// `true` when there is nothing to send.
    pub fn is_noop(&self) -> bool {
        self.inserts.is_empty() && self.delete_keys.is_empty()
    }
}

/// Reads the change log and the source tables it points at.
pub struct Classifier<'a> {
    db: &'a Database,
    log_table: &'a str,
}

impl<'a> Classifier<'a> {
    pub fn new(db: &'a Database, log_table: &'a str) -> Self {
        Self { db, log_table }
    }

    /// Classify every pending record of `kind`.
    ///
    /// The log is fetched in full before any snapshot is read. A read error
    /// anywhere aborts with no partial result.
    #[instrument(skip(self), fields(log_table = self.log_table))]
    pub fn classify(&self, kind: EntityKind) -> Result<Classification, SyncError> {
        let records = self.db.fetch_change_log(self.log_table, kind)?;
        let mut out = Classification::empty(kind);
        if records.is_empty() {
            debug!(entity = %kind, "change log empty");
            return Ok(out);
        }

        let mut inserts = Vec::new();
        let mut delete_keys = Vec::new();
        let mut seen_deletes = HashSet::new();

        for record in &records {
            out.consumed_ids.push(record.id);
            match record.operation {
                ChangeOp::Delete => {
                    if seen_deletes.insert(record.row_ref) {
                        delete_keys.push(record.row_ref);
                    }
                }
                ChangeOp::Insert | ChangeOp::Update => {
                    let Some(snapshot) = self.db.read_snapshot(kind, record.row_ref)? else {
                        warn!(
                            entity = %kind,
                            id = record.id,
                            row_ref = record.row_ref,
                            op = %record.operation,
                            "source row gone before it could be read, skipping"
                        );
                        out.skipped += 1;
                        continue;
                    };
                    // An update may have changed the natural key, so the old
                    // remote row is removed by row_ref first.
                    if record.operation == ChangeOp::Update && seen_deletes.insert(record.row_ref) {
                        delete_keys.push(record.row_ref);
                    }
                    inserts.push(snapshot);
                }
            }
        }

        out.inserts = dedupe_last_wins(inserts, EntitySnapshot::natural_key);
        out.delete_keys = delete_keys;

        info!(
            entity = %kind,
            consumed = out.consumed_ids.len(),
            inserts = out.inserts.len(),
            deletes = out.delete_keys.len(),
            skipped = out.skipped,
            "classified change log"
        );
        Ok(out)
    }
}
