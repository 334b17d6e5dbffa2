//! Gateway backed by a local SQLite database.
//!
//! Statements are executed with native parameter binding. Used as a local
//! mirror target (`gateway.kind = "sqlite"`) and as the remote in tests.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use tracing::debug;

use super::{CommandGateway, CommandOutcome, RemoteRow, SqlValue, Statement};
use crate::db::Database;
use crate::errors::GatewayError;

pub struct SqliteGateway {
    db: Database,
}

impl SqliteGateway {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GatewayError> {
        let db = Database::new(path).map_err(|e| GatewayError::NotConfigured(e.to_string()))?;
        Ok(Self { db })
    }

    pub fn in_memory() -> Result<Self, GatewayError> {
        let db = Database::in_memory().map_err(|e| GatewayError::NotConfigured(e.to_string()))?;
        Ok(Self { db })
    }

    /// The underlying database, for inspecting mirrored rows.
    pub fn database(&self) -> &Database {
        &self.db
    }

    fn select_blocking(&self, stmt: &Statement) -> Result<Vec<RemoteRow>, GatewayError> {
        let conn = self.db.conn();
        let sql = positional(&stmt.sql);
        let mut prepared = conn.prepare(&sql)?;
        let columns: Vec<String> = prepared
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();

        let mut rows = prepared.query(rusqlite::params_from_iter(stmt.params.iter().map(to_sql)))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut map = RemoteRow::new();
            for (idx, name) in columns.iter().enumerate() {
                map.insert(name.clone(), to_json(row.get_ref(idx)?));
            }
            out.push(map);
        }
        Ok(out)
    }

    fn command_blocking(&self, stmt: &Statement) -> Result<CommandOutcome, GatewayError> {
        let conn = self.db.conn();
        let sql = positional(&stmt.sql);
        let affected = if stmt.params.is_empty() {
            conn.execute_batch(&sql)?;
            None
        } else {
            Some(conn.execute(&sql, rusqlite::params_from_iter(stmt.params.iter().map(to_sql)))? as u64)
        };
        Ok(CommandOutcome {
            message: "ok".into(),
            rows_affected: affected,
        })
    }
}

#[async_trait]
impl CommandGateway for SqliteGateway {
    async fn execute_select(&self, stmt: &Statement) -> Result<Vec<RemoteRow>, GatewayError> {
        let rows = self.select_blocking(stmt)?;
        debug!(count = rows.len(), "sqlite select");
        Ok(rows)
    }

    async fn execute_command(&self, stmt: &Statement) -> Result<CommandOutcome, GatewayError> {
        let outcome = self.command_blocking(stmt)?;
        debug!(rows_affected = ?outcome.rows_affected, "sqlite command");
        Ok(outcome)
    }
}

/// Rewrite `$n` placeholders to SQLite's `?n`.
fn positional(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek().is_some_and(|c| c.is_ascii_digit()) {
            out.push('?');
        } else {
            out.push(ch);
        }
    }
    out
}

fn to_sql(value: &SqlValue) -> rusqlite::types::Value {
    use rusqlite::types::Value;
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(*v),
        SqlValue::Real(v) => Value::Real(*v),
        SqlValue::Text(s) => Value::Text(s.clone()),
    }
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(v) => serde_json::Value::from(v),
        ValueRef::Real(v) => serde_json::Number::from_f64(v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => serde_json::Value::String(format!("<{} bytes>", bytes.len())),
    }
}
