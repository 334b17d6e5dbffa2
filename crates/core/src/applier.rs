//! Chunked writes against the remote store.
//!
//! The [`Applier`] turns row sets into bounded statements, sends them one at
//! a time through a [`CommandGateway`], and applies the entity's
//! [`FailurePolicy`] to every chunk.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{EntitySettings, FailurePolicy};
use crate::errors::{GatewayError, SyncError};
use crate::gateway::{CommandGateway, SqlValue, Statement, TableSpec};

/// Remote key column written alongside every change-log entity.
pub const ROW_REF_COLUMN: &str = "row_order_ref";

/// Counts from one apply call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Delete keys sent in chunks that succeeded.
    pub deleted: usize,
    /// Rows sent in upsert chunks that succeeded.
    pub upserted: usize,
    pub failed_chunks: usize,
    pub failed_rows: usize,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.failed_chunks == 0
    }

    fn merge(&mut self, other: ApplyReport) {
        self.deleted += other.deleted;
        self.upserted += other.upserted;
        self.failed_chunks += other.failed_chunks;
        self.failed_rows += other.failed_rows;
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Delete,
    Upsert,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Upsert => "upsert",
        }
    }
}

/// Sends chunked statements through a gateway.
pub struct Applier<'a> {
    gateway: &'a dyn CommandGateway,
    chunk_delay: Duration,
}

impl<'a> Applier<'a> {
    pub fn new(gateway: &'a dyn CommandGateway, chunk_delay: Duration) -> Self {
        Self {
            gateway,
            chunk_delay,
        }
    }

    /// Create the remote table if it does not exist yet.
    pub async fn ensure_table(&self, table: &TableSpec) -> Result<(), SyncError> {
        self.gateway
            .execute_command(&Statement::create_table(table))
            .await
            .map_err(|source| SyncError::RemoteSchema {
                table: table.name.to_string(),
                source,
            })?;
        debug!(table = table.name, "remote table ready");
        Ok(())
    }

    /// Apply a change-log classification: `row_order_ref` deletes first,
    /// then upserts.
    ///
    /// Under [`FailurePolicy::AbortOnFirstFailure`] the first failed chunk
    /// ends the call with [`SyncError::ChunkFailed`] and nothing after it is
    /// sent.
    pub async fn apply(
        &self,
        entity: &str,
        table: &TableSpec,
        delete_keys: &[i64],
        rows: &[Vec<SqlValue>],
        settings: &EntitySettings,
    ) -> Result<ApplyReport, SyncError> {
        let keys: Vec<SqlValue> = delete_keys.iter().map(|k| SqlValue::Integer(*k)).collect();
        let mut report = self
            .run_chunks(entity, Phase::Delete, &keys, settings, |chunk| {
                Statement::delete_in(table, ROW_REF_COLUMN, chunk)
            })
            .await?;

        if !keys.is_empty() && !rows.is_empty() {
            self.pause().await;
        }
        report.merge(self.upsert_rows(entity, table, rows, settings).await?);

        info!(
            entity,
            deleted = report.deleted,
            upserted = report.upserted,
            failed_chunks = report.failed_chunks,
            failed_rows = report.failed_rows,
            "apply finished"
        );
        Ok(report)
    }

    /// Upsert `rows` on the table's natural key in chunks of `batch_size`.
    pub async fn upsert_rows(
        &self,
        entity: &str,
        table: &TableSpec,
        rows: &[Vec<SqlValue>],
        settings: &EntitySettings,
    ) -> Result<ApplyReport, SyncError> {
        self.run_chunks(entity, Phase::Upsert, rows, settings, |chunk| {
            Statement::upsert(table, chunk)
        })
        .await
    }

    /// Delete rows by composite natural key in chunks of `batch_size`.
    pub async fn delete_by_natural_key(
        &self,
        entity: &str,
        table: &TableSpec,
        keys: &[Vec<SqlValue>],
        settings: &EntitySettings,
    ) -> Result<ApplyReport, SyncError> {
        self.run_chunks(entity, Phase::Delete, keys, settings, |chunk| {
            Statement::delete_by_keys(table, chunk)
        })
        .await
    }

    async fn run_chunks<T, F>(
        &self,
        entity: &str,
        phase: Phase,
        items: &[T],
        settings: &EntitySettings,
        build: F,
    ) -> Result<ApplyReport, SyncError>
    where
        T: Sync,
        F: Fn(&[T]) -> Statement,
    {
        let mut report = ApplyReport::default();
        for (idx, chunk) in items.chunks(settings.batch_size.max(1)).enumerate() {
            if idx > 0 {
                self.pause().await;
            }
            let stmt = build(chunk);
            if self
                .send_chunk(entity, phase, idx, chunk.len(), &stmt, settings)
                .await?
            {
                match phase {
                    Phase::Delete => report.deleted += chunk.len(),
                    Phase::Upsert => report.upserted += chunk.len(),
                }
            } else {
                report.failed_chunks += 1;
                report.failed_rows += chunk.len();
            }
        }
        Ok(report)
    }

    async fn pause(&self) {
        if !self.chunk_delay.is_zero() {
            tokio::time::sleep(self.chunk_delay).await;
        }
    }

    /// Send one chunk under the entity's policy.
    ///
    /// Returns `Ok(true)` once the chunk succeeded and `Ok(false)` when a
    /// resilient policy gave up on it.
    async fn send_chunk(
        &self,
        entity: &str,
        phase: Phase,
        chunk: usize,
        rows: usize,
        stmt: &Statement,
        settings: &EntitySettings,
    ) -> Result<bool, SyncError> {
        let attempts = match settings.failure_policy {
            FailurePolicy::AbortOnFirstFailure => 1,
            FailurePolicy::ContinueOnChunkFailure => settings.max_attempts.max(1),
        };

        let mut last_err: Option<GatewayError> = None;
        for attempt in 1..=attempts {
            match self.gateway.execute_command(stmt).await {
                Ok(outcome) => {
                    debug!(
                        entity,
                        phase = phase.as_str(),
                        chunk,
                        rows,
                        attempt,
                        rows_affected = ?outcome.rows_affected,
                        "chunk applied"
                    );
                    return Ok(true);
                }
                Err(e) => {
                    if attempt < attempts {
                        let delay = settings.retry_delay * attempt;
                        warn!(
                            entity,
                            phase = phase.as_str(),
                            chunk,
                            rows,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "chunk failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_err = Some(e);
                }
            }
        }

        let source = last_err.unwrap_or_else(|| GatewayError::Rejected("no attempt made".into()));
        match settings.failure_policy {
            FailurePolicy::AbortOnFirstFailure => {
                error!(
                    entity,
                    phase = phase.as_str(),
                    chunk,
                    rows,
                    error = %source,
                    "chunk failed, aborting entity"
                );
                Err(SyncError::ChunkFailed {
                    entity: entity.to_string(),
                    phase: phase.as_str().to_string(),
                    chunk,
                    rows,
                    source,
                })
            }
            FailurePolicy::ContinueOnChunkFailure => {
                error!(
                    entity,
                    phase = phase.as_str(),
                    chunk,
                    rows,
                    attempts,
                    error = %source,
                    "chunk failed after all attempts, continuing"
                );
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::gateway::statement::Column;
    use crate::gateway::{CommandOutcome, RemoteRow};
    use crate::models::SyncMode;

    static TABLE: TableSpec = TableSpec {
        name: "ar_customer",
        columns: &[
            Column { name: "row_order_ref", sql_type: "BIGINT" },
            Column { name: "code", sql_type: "VARCHAR(50)" },
        ],
        key: &["code"],
    };

    /// Records every command; fails the calls whose index is listed.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_calls: Vec<usize>,
    }

    #[async_trait]
    impl CommandGateway for Recorder {
        async fn execute_select(&self, _stmt: &Statement) -> Result<Vec<RemoteRow>, GatewayError> {
            Ok(Vec::new())
        }

        async fn execute_command(&self, stmt: &Statement) -> Result<CommandOutcome, GatewayError> {
            let mut calls = self.calls.lock().unwrap();
            let idx = calls.len();
            calls.push(stmt.sql.clone());
            if self.fail_calls.contains(&idx) {
                Err(GatewayError::Rejected("boom".into()))
            } else {
                Ok(CommandOutcome::default())
            }
        }
    }

    fn rows(n: i64) -> Vec<Vec<SqlValue>> {
        (0..n)
            .map(|i| vec![SqlValue::Integer(i), SqlValue::Text(format!("C{i}"))])
            .collect()
    }

    fn settings(policy: FailurePolicy, batch_size: usize) -> EntitySettings {
        EntitySettings {
            enabled: true,
            mode: SyncMode::ChangeLog,
            batch_size,
            failure_policy: policy,
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deletes_before_upserts_in_bounded_chunks() {
        let gw = Recorder::default();
        let applier = Applier::new(&gw, Duration::from_millis(100));
        let report = applier
            .apply(
                "customer",
                &TABLE,
                &[1, 2, 3],
                &rows(5),
                &settings(FailurePolicy::ContinueOnChunkFailure, 2),
            )
            .await
            .unwrap();

        let calls = gw.calls.lock().unwrap();
        assert_eq!(calls.len(), 5);
        assert!(calls[0].starts_with("DELETE FROM ar_customer WHERE row_order_ref IN"));
        assert!(calls[1].starts_with("DELETE"));
        assert!(calls[2..].iter().all(|sql| sql.starts_with("INSERT INTO ar_customer")));
        assert_eq!(report.deleted, 3);
        assert_eq!(report.upserted, 5);
        assert!(report.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resilient_policy_retries_then_succeeds() {
        let gw = Recorder {
            fail_calls: vec![0, 1],
            ..Default::default()
        };
        let applier = Applier::new(&gw, Duration::ZERO);
        let report = applier
            .upsert_rows(
                "customer",
                &TABLE,
                &rows(2),
                &settings(FailurePolicy::ContinueOnChunkFailure, 10),
            )
            .await
            .unwrap();
        assert_eq!(gw.calls.lock().unwrap().len(), 3);
        assert_eq!(report.upserted, 2);
        assert!(report.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resilient_policy_gives_up_and_continues() {
        // Chunk 0 fails all three attempts; chunk 1 succeeds.
        let gw = Recorder {
            fail_calls: vec![0, 1, 2],
            ..Default::default()
        };
        let applier = Applier::new(&gw, Duration::from_millis(100));
        let report = applier
            .upsert_rows(
                "customer",
                &TABLE,
                &rows(4),
                &settings(FailurePolicy::ContinueOnChunkFailure, 2),
            )
            .await
            .unwrap();
        assert_eq!(gw.calls.lock().unwrap().len(), 4);
        assert_eq!(report.failed_chunks, 1);
        assert_eq!(report.failed_rows, 2);
        assert_eq!(report.upserted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_policy_stops_at_first_failure() {
        let gw = Recorder {
            fail_calls: vec![1],
            ..Default::default()
        };
        let applier = Applier::new(&gw, Duration::from_millis(100));
        let err = applier
            .upsert_rows(
                "price",
                &TABLE,
                &rows(6),
                &settings(FailurePolicy::AbortOnFirstFailure, 2),
            )
            .await
            .unwrap_err();

        assert_eq!(gw.calls.lock().unwrap().len(), 2);
        match err {
            SyncError::ChunkFailed { entity, chunk, rows, .. } => {
                assert_eq!(entity, "price");
                assert_eq!(chunk, 1);
                assert_eq!(rows, 2);
            }
            other => panic!("expected ChunkFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_is_linear() {
        let gw = Recorder {
            fail_calls: vec![0, 1],
            ..Default::default()
        };
        let applier = Applier::new(&gw, Duration::ZERO);
        let start = tokio::time::Instant::now();
        applier
            .upsert_rows(
                "customer",
                &TABLE,
                &rows(1),
                &settings(FailurePolicy::ContinueOnChunkFailure, 10),
            )
            .await
            .unwrap();
        // 500ms after attempt 1, 1000ms after attempt 2.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1500), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1600), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_ensure_table_maps_to_schema_error() {
        let gw = Recorder {
            fail_calls: vec![0],
            ..Default::default()
        };
        let err = Applier::new(&gw, Duration::ZERO)
            .ensure_table(&TABLE)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RemoteSchema { ref table, .. } if table == "ar_customer"));
    }
}
