//! Domain model types used throughout marketsync.
//!
//! These types bridge the source change log, the sync engine, and the
//! per-cycle reports handed back to the daemon.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DatabaseError;

// ---------------------------------------------------------------------------
// Change log
// ---------------------------------------------------------------------------

/// Business table a change-log record points at.
///
/// The integer codes are the `table_id` values written by the source
/// triggers and must not change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Price,
    Inventory,
    ProductBarcode,
    Customer,
    PriceFormula,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        Self::Price,
        Self::Inventory,
        Self::ProductBarcode,
        Self::Customer,
        Self::PriceFormula,
    ];

    pub fn code(self) -> i64 {
        match self {
            Self::Price => 1,
            Self::Inventory => 2,
            Self::ProductBarcode => 3,
            Self::Customer => 4,
            Self::PriceFormula => 5,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, DatabaseError> {
        match code {
            1 => Ok(Self::Price),
            2 => Ok(Self::Inventory),
            3 => Ok(Self::ProductBarcode),
            4 => Ok(Self::Customer),
            5 => Ok(Self::PriceFormula),
            other => Err(DatabaseError::InvalidCode {
                column: "table_id".into(),
                value: other,
            }),
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Price => write!(f, "price"),
            Self::Inventory => write!(f, "inventory"),
            Self::ProductBarcode => write!(f, "product_barcode"),
            Self::Customer => write!(f, "customer"),
            Self::PriceFormula => write!(f, "price_formula"),
        }
    }
}

/// Operation recorded by a trigger (`active_code`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn code(self) -> i64 {
        match self {
            Self::Insert => 1,
            Self::Update => 2,
            Self::Delete => 3,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, DatabaseError> {
        match code {
            1 => Ok(Self::Insert),
            2 => Ok(Self::Update),
            3 => Ok(Self::Delete),
            other => Err(DatabaseError::InvalidCode {
                column: "active_code".into(),
                value: other,
            }),
        }
    }
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// One pending row of the change-log table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogRecord {
    pub id: i64,
    pub entity_kind: EntityKind,
    pub operation: ChangeOp,
    /// `roworder` of the changed source row.
    pub row_ref: i64,
}

// ---------------------------------------------------------------------------
// Datasets
// ---------------------------------------------------------------------------

/// Everything the engine can synchronize: the five change-log entities plus
/// stock balances, which have no change-log coverage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    Price,
    Inventory,
    ProductBarcode,
    Customer,
    PriceFormula,
    Balance,
}

impl Dataset {
    /// Processing order of a cycle. Products first so barcodes and prices
    /// land after the items they refer to.
    pub const CYCLE_ORDER: [Dataset; 6] = [
        Self::Inventory,
        Self::ProductBarcode,
        Self::Price,
        Self::PriceFormula,
        Self::Customer,
        Self::Balance,
    ];

    /// The change-log kind feeding this dataset, if any.
    pub fn entity_kind(self) -> Option<EntityKind> {
        match self {
            Self::Price => Some(EntityKind::Price),
            Self::Inventory => Some(EntityKind::Inventory),
            Self::ProductBarcode => Some(EntityKind::ProductBarcode),
            Self::Customer => Some(EntityKind::Customer),
            Self::PriceFormula => Some(EntityKind::PriceFormula),
            Self::Balance => None,
        }
    }
}

impl From<EntityKind> for Dataset {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Price => Self::Price,
            EntityKind::Inventory => Self::Inventory,
            EntityKind::ProductBarcode => Self::ProductBarcode,
            EntityKind::Customer => Self::Customer,
            EntityKind::PriceFormula => Self::PriceFormula,
        }
    }
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.entity_kind() {
            Some(kind) => kind.fmt(f),
            None => write!(f, "balance"),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// How a dataset was synchronized in a cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Drain the change log: classify, apply, prune.
    #[default]
    ChangeLog,
    /// Diff the whole local extent against the whole remote extent.
    FullSnapshot,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChangeLog => write!(f, "change_log"),
            Self::FullSnapshot => write!(f, "full_snapshot"),
        }
    }
}

/// Outcome of one dataset within a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityReport {
    pub dataset: Dataset,
    pub mode: SyncMode,
    /// Change-log ids drained by the classifier.
    pub consumed: usize,
    /// Rows upserted remotely. On the change-log path this includes the
    /// insert half of every update.
    pub inserted: usize,
    /// Rows rewritten by a full-snapshot reconcile. Always 0 on the
    /// change-log path, where an update is a delete plus an insert.
    pub updated: usize,
    /// Rows deleted remotely.
    pub deleted: usize,
    /// Log records whose snapshot had vanished.
    pub skipped: usize,
    pub failed_rows: usize,
    pub pruned: usize,
    pub prune_failed_batches: usize,
    /// Change-log ids left in place because the apply was not confirmed.
    pub prune_deferred: usize,
    /// Hard error that ended this dataset's cycle early.
    pub error: Option<String>,
}

impl EntityReport {
    pub fn new(dataset: Dataset, mode: SyncMode) -> Self {
        Self {
            dataset,
            mode,
            consumed: 0,
            inserted: 0,
            updated: 0,
            deleted: 0,
            skipped: 0,
            failed_rows: 0,
            pruned: 0,
            prune_failed_batches: 0,
            prune_deferred: 0,
            error: None,
        }
    }

    /// `true` if anything went wrong, including partial chunk loss.
    pub fn is_degraded(&self) -> bool {
        self.error.is_some() || self.failed_rows > 0 || self.prune_failed_batches > 0
    }
}

/// Outcome of one full cycle over every enabled dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub entities: Vec<EntityReport>,
}

impl CycleReport {
    pub fn start() -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            started_at: Utc::now(),
            completed_at: None,
            entities: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.entities.iter().any(|e| e.error.is_some())
    }

    pub fn entity(&self, dataset: Dataset) -> Option<&EntityReport> {
        self.entities.iter().find(|e| e.dataset == dataset)
    }
}
