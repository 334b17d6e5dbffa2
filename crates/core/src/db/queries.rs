//! Typed query helpers over the source database.

use rusqlite::{params, params_from_iter, OptionalExtension};
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{ChangeLogRecord, ChangeOp, EntityKind};
use crate::records::{
    BarcodeRecord, ChangeLogged, CustomerRecord, EntitySnapshot, InventoryRecord,
    PriceFormulaRecord, PriceRecord, SyncRecord,
};

// ---------------------------------------------------------------------------
// Change log
// ---------------------------------------------------------------------------

impl Database {
    /// Every pending change-log row for `kind`, oldest first.
    ///
    /// The whole result is materialized before returning; any row that fails
    /// to convert fails the call.
    pub fn fetch_change_log(
        &self,
        log_table: &str,
        kind: EntityKind,
    ) -> Result<Vec<ChangeLogRecord>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, row_order_ref, active_code FROM {log_table} WHERE table_id = ?1 ORDER BY id"
        ))?;
        let raw = stmt
            .query_map(params![kind.code()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let records = raw
            .into_iter()
            .map(|(id, row_ref, active_code)| {
                Ok(ChangeLogRecord {
                    id,
                    entity_kind: kind,
                    operation: ChangeOp::from_code(active_code)?,
                    row_ref,
                })
            })
            .collect::<Result<Vec<_>, DatabaseError>>()?;

        debug!(entity = %kind, count = records.len(), "fetched change log");
        Ok(records)
    }

    /// Number of pending change-log rows across all kinds.
    pub fn count_change_log(&self, log_table: &str) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count = conn.query_row(&format!("SELECT COUNT(*) FROM {log_table}"), [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    /// Delete consumed change-log rows. Returns the number removed.
    pub fn delete_change_log_ids(&self, log_table: &str, ids: &[i64]) -> Result<usize, DatabaseError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
        let conn = self.conn();
        let removed = conn.execute(
            &format!(
                "DELETE FROM {log_table} WHERE id IN ({})",
                placeholders.join(", ")
            ),
            params_from_iter(ids.iter()),
        )?;
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Snapshots and extents
// ---------------------------------------------------------------------------

impl Database {
    /// Current state of one source row, or `None` if it no longer exists
    /// (or is excluded by the record's source filter).
    pub fn read_record<R: ChangeLogged>(&self, row_ref: i64) -> Result<Option<R>, DatabaseError> {
        let mut sql = format!("{} WHERE {} = ?1", R::SOURCE_SELECT, R::SOURCE_ROW_REF);
        if let Some(filter) = R::SOURCE_FILTER {
            sql.push_str(" AND ");
            sql.push_str(filter);
        }

        let record = {
            let conn = self.conn();
            conn.query_row(&sql, params![row_ref], |row| R::from_source(row))
                .optional()?
        };

        match record {
            Some(record) => {
                record.validate().map_err(|detail| DatabaseError::DataShape {
                    table: R::TABLE.name.to_string(),
                    at: format!("roworder {row_ref}"),
                    detail,
                })?;
                Ok(Some(record))
            }
            None => {
                debug!(entity = %R::KIND, row_ref, "snapshot row not found");
                Ok(None)
            }
        }
    }

    /// Snapshot for a change-log row, tagged with its kind.
    pub fn read_snapshot(
        &self,
        kind: EntityKind,
        row_ref: i64,
    ) -> Result<Option<EntitySnapshot>, DatabaseError> {
        let snapshot = match kind {
            EntityKind::Price => self.read_record::<PriceRecord>(row_ref)?.map(ChangeLogged::into_snapshot),
            EntityKind::Inventory => self
                .read_record::<InventoryRecord>(row_ref)?
                .map(ChangeLogged::into_snapshot),
            EntityKind::ProductBarcode => self
                .read_record::<BarcodeRecord>(row_ref)?
                .map(ChangeLogged::into_snapshot),
            EntityKind::Customer => self
                .read_record::<CustomerRecord>(row_ref)?
                .map(ChangeLogged::into_snapshot),
            EntityKind::PriceFormula => self
                .read_record::<PriceFormulaRecord>(row_ref)?
                .map(ChangeLogged::into_snapshot),
        };
        Ok(snapshot)
    }

    /// Every source row of `R`, validated.
    pub fn read_extent<R: SyncRecord>(&self) -> Result<Vec<R>, DatabaseError> {
        let mut sql = R::SOURCE_SELECT.to_string();
        if let Some(filter) = R::SOURCE_FILTER {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }

        let records = {
            let conn = self.conn();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| R::from_source(row))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        for record in &records {
            record.validate().map_err(|detail| DatabaseError::DataShape {
                table: R::TABLE.name.to_string(),
                at: format!("key {:?}", record.natural_key()),
                detail,
            })?;
        }

        debug!(table = R::TABLE.name, count = records.len(), "read source extent");
        Ok(records)
    }
}
