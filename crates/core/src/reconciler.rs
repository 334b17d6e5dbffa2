//! Full-snapshot reconciliation.
//!
//! Compares the complete local extent of a dataset with the complete remote
//! extent and derives the inserts, updates and deletes that make the remote
//! equal to the source. Used for datasets without change-log coverage and
//! for any entity configured with `mode = "full_snapshot"`.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, instrument};

use crate::applier::{Applier, ApplyReport};
use crate::config::EntitySettings;
use crate::db::Database;
use crate::errors::SyncError;
use crate::gateway::{CommandGateway, SqlValue, Statement};
use crate::records::{dedupe_last_wins, NaturalKey, SyncRecord};

/// Writes needed to bring the remote extent in line with the source.
#[derive(Debug, Clone)]
pub struct ReconcilePlan<R> {
    /// Local rows missing remotely.
    pub inserts: Vec<R>,
    /// Local rows whose remote counterpart differs.
    pub updates: Vec<R>,
    /// Natural-key values of remote rows missing locally.
    pub deletes: Vec<Vec<SqlValue>>,
}

impl<R> ReconcilePlan<R> {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Rows actually written by one reconcile run. Rows in failed chunks are
/// counted in `apply.failed_rows`, not here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub apply: ApplyReport,
}

/// Diff `local` against `remote`. Numeric columns compare within `epsilon`.
///
/// Output order is deterministic: inserts and updates follow `local`,
/// deletes are sorted by key.
pub fn diff<R: SyncRecord>(
    local: &[R],
    remote: &HashMap<NaturalKey, R>,
    epsilon: f64,
) -> ReconcilePlan<R> {
    let mut plan = ReconcilePlan {
        inserts: Vec::new(),
        updates: Vec::new(),
        deletes: Vec::new(),
    };

    let mut local_keys: HashSet<NaturalKey> = HashSet::with_capacity(local.len());
    for record in local {
        let key = record.natural_key();
        match remote.get(&key) {
            None => plan.inserts.push(record.clone()),
            Some(existing) if record.differs(existing, epsilon) => {
                plan.updates.push(record.clone())
            }
            Some(_) => {}
        }
        local_keys.insert(key);
    }

    let mut remote_only: Vec<(&NaturalKey, &R)> = remote
        .iter()
        .filter(|(key, _)| !local_keys.contains(*key))
        .collect();
    remote_only.sort_by(|a, b| a.0.cmp(b.0));
    plan.deletes = remote_only.into_iter().map(|(_, r)| r.key_values()).collect();

    plan
}

/// Plans and applies full-snapshot syncs.
pub struct Reconciler<'a> {
    db: &'a Database,
    gateway: &'a dyn CommandGateway,
    page_size: usize,
    epsilon: f64,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        db: &'a Database,
        gateway: &'a dyn CommandGateway,
        page_size: usize,
        epsilon: f64,
    ) -> Self {
        Self {
            db,
            gateway,
            page_size: page_size.max(1),
            epsilon,
        }
    }

    /// Read the whole remote table page by page, keyed by natural key.
    ///
    /// A row that cannot be parsed aborts the read.
    pub async fn fetch_remote<R: SyncRecord>(&self) -> Result<HashMap<NaturalKey, R>, SyncError> {
        let mut out = HashMap::new();
        let mut offset = 0usize;
        loop {
            let stmt = Statement::select_page(R::TABLE, self.page_size, offset);
            let page = self.gateway.execute_select(&stmt).await?;
            let fetched = page.len();
            for row in &page {
                let record = R::from_remote(row)?;
                out.insert(record.natural_key(), record);
            }
            debug!(table = R::TABLE.name, offset, fetched, "fetched remote page");
            if fetched < self.page_size {
                break;
            }
            offset += fetched;
        }
        Ok(out)
    }

    #[instrument(skip(self), fields(table = R::TABLE.name))]
    pub async fn plan<R: SyncRecord>(&self) -> Result<ReconcilePlan<R>, SyncError> {
        let remote = self.fetch_remote::<R>().await?;
        let local = dedupe_last_wins(self.db.read_extent::<R>()?, R::natural_key);
        let plan = diff(&local, &remote, self.epsilon);
        info!(
            table = R::TABLE.name,
            local = local.len(),
            remote = remote.len(),
            inserts = plan.inserts.len(),
            updates = plan.updates.len(),
            deletes = plan.deletes.len(),
            "reconcile plan ready"
        );
        Ok(plan)
    }

    /// Plan, then delete by natural key, upsert inserts, and upsert updates.
    pub async fn reconcile<R: SyncRecord>(
        &self,
        applier: &Applier<'_>,
        entity: &str,
        settings: &EntitySettings,
    ) -> Result<ReconcileReport, SyncError> {
        let plan = self.plan::<R>().await?;
        let mut report = ReconcileReport::default();
        if plan.is_empty() {
            debug!(entity, "remote already matches source");
            return Ok(report);
        }

        report.apply = applier
            .delete_by_natural_key(entity, R::TABLE, &plan.deletes, settings)
            .await?;
        report.deleted = report.apply.deleted;

        for (rows, count) in [
            (&plan.inserts, &mut report.inserted),
            (&plan.updates, &mut report.updated),
        ] {
            let rows: Vec<Vec<SqlValue>> = rows.iter().map(R::values).collect();
            let upserts = applier.upsert_rows(entity, R::TABLE, &rows, settings).await?;
            *count = upserts.upserted;
            report.apply.upserted += upserts.upserted;
            report.apply.failed_chunks += upserts.failed_chunks;
            report.apply.failed_rows += upserts.failed_rows;
        }

        Ok(report)
    }
}
