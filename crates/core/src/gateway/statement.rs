//! Parameterized statements for the remote command endpoint.
//!
//! Every statement the engine sends is built here: SQL text with `$n`
//! placeholders plus a typed parameter list. Values are never formatted into
//! SQL by callers. Gateways that only accept plain text go through
//! [`Statement::render_inline`], the one place literals are produced.

use serde::Serialize;

use crate::errors::GatewayError;

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A single statement parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    /// Render the value as a SQL literal.
    ///
    /// Strings are single-quoted with embedded quotes doubled. NUL bytes and
    /// non-finite floats have no portable literal form and are rejected.
    pub fn to_literal(&self) -> Result<String, GatewayError> {
        match self {
            Self::Null => Ok("NULL".to_string()),
            Self::Integer(v) => Ok(v.to_string()),
            Self::Real(v) if v.is_finite() => Ok(format!("{v:?}")),
            Self::Real(v) => Err(GatewayError::Encode(format!("non-finite number {v}"))),
            Self::Text(s) if s.contains('\0') => {
                Err(GatewayError::Encode("text contains NUL byte".into()))
            }
            Self::Text(s) => Ok(format!("'{}'", s.replace('\'', "''"))),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

// ---------------------------------------------------------------------------
// Remote table shape
// ---------------------------------------------------------------------------

/// One column of a remote table.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    /// Column type, written so both PostgreSQL and SQLite accept it.
    pub sql_type: &'static str,
}

/// Remote table layout: name, columns in write order, and natural key.
#[derive(Debug)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub key: &'static [&'static str],
}

impl TableSpec {
    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

/// SQL text with `$1..$n` placeholders and the values bound to them.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    /// A statement without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` with a uniqueness constraint on the
    /// natural key.
    pub fn create_table(table: &TableSpec) -> Self {
        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|c| {
                if table.key.contains(&c.name) {
                    format!("{} {} NOT NULL", c.name, c.sql_type)
                } else {
                    format!("{} {}", c.name, c.sql_type)
                }
            })
            .collect();
        Self::raw(format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, UNIQUE ({}))",
            table.name,
            columns.join(", "),
            table.key.join(", ")
        ))
    }

    /// Multi-row insert that overwrites non-key columns on a natural-key
    /// conflict. Each row must hold one value per column of `table`.
    pub fn upsert(table: &TableSpec, rows: &[Vec<SqlValue>]) -> Self {
        let width = table.columns.len();
        let mut params = Vec::with_capacity(rows.len() * width);
        let mut tuples = Vec::with_capacity(rows.len());

        for row in rows {
            debug_assert_eq!(row.len(), width, "row width must match {}", table.name);
            let start = params.len();
            let placeholders: Vec<String> =
                (1..=width).map(|i| format!("${}", start + i)).collect();
            tuples.push(format!("({})", placeholders.join(", ")));
            params.extend(row.iter().cloned());
        }

        let updates: Vec<String> = table
            .column_names()
            .filter(|c| !table.key.contains(c))
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();
        let conflict_action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };

        Self {
            sql: format!(
                "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({}) {}",
                table.name,
                table.column_names().collect::<Vec<_>>().join(", "),
                tuples.join(", "),
                table.key.join(", "),
                conflict_action
            ),
            params,
        }
    }

    /// `DELETE FROM table WHERE column IN ($1, ..)`.
    pub fn delete_in(table: &TableSpec, column: &str, keys: &[SqlValue]) -> Self {
        let placeholders: Vec<String> = (1..=keys.len()).map(|i| format!("${i}")).collect();
        Self {
            sql: format!(
                "DELETE FROM {} WHERE {} IN ({})",
                table.name,
                column,
                placeholders.join(", ")
            ),
            params: keys.to_vec(),
        }
    }

    /// Delete rows by composite natural key as a row-value membership test,
    /// `WHERE (k1, k2) IN (VALUES ($1, $2), ..)`. The expression stays flat
    /// however many keys a chunk holds.
    pub fn delete_by_keys(table: &TableSpec, keys: &[Vec<SqlValue>]) -> Self {
        let width = table.key.len();
        let mut params = Vec::with_capacity(keys.len() * width);
        let mut tuples = Vec::with_capacity(keys.len());

        for key in keys {
            debug_assert_eq!(key.len(), width, "key width must match {}", table.name);
            let start = params.len();
            let placeholders: Vec<String> =
                (1..=width).map(|i| format!("${}", start + i)).collect();
            tuples.push(format!("({})", placeholders.join(", ")));
            params.extend(key.iter().cloned());
        }

        Self {
            sql: format!(
                "DELETE FROM {} WHERE ({}) IN (VALUES {})",
                table.name,
                table.key.join(", "),
                tuples.join(", ")
            ),
            params,
        }
    }

    /// One page of the full remote extent in natural-key order.
    pub fn select_page(table: &TableSpec, limit: usize, offset: usize) -> Self {
        Self {
            sql: format!(
                "SELECT {} FROM {} ORDER BY {} LIMIT $1 OFFSET $2",
                table.column_names().collect::<Vec<_>>().join(", "),
                table.name,
                table.key.join(", ")
            ),
            params: vec![
                SqlValue::Integer(limit as i64),
                SqlValue::Integer(offset as i64),
            ],
        }
    }

    /// Substitute every `$n` placeholder with the literal form of its value.
    ///
    /// Placeholders only ever appear in generated SQL, outside quotes, so a
    /// single left-to-right scan is enough.
    pub fn render_inline(&self) -> Result<String, GatewayError> {
        let mut out = String::with_capacity(self.sql.len() + self.params.len() * 8);
        let mut chars = self.sql.char_indices().peekable();

        while let Some((_, ch)) = chars.next() {
            if ch != '$' {
                out.push(ch);
                continue;
            }
            let mut digits = String::new();
            while let Some(&(_, d)) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                digits.push(d);
                chars.next();
            }
            if digits.is_empty() {
                out.push('$');
                continue;
            }
            let index: usize = digits
                .parse()
                .map_err(|_| GatewayError::Encode(format!("bad placeholder ${digits}")))?;
            let value = index
                .checked_sub(1)
                .and_then(|i| self.params.get(i))
                .ok_or_else(|| {
                    GatewayError::Encode(format!("placeholder ${index} has no parameter"))
                })?;
            out.push_str(&value.to_literal()?);
        }

        Ok(out)
    }
}
