//! Remote command gateway.
//!
//! The remote store is only reachable through an endpoint that runs one SQL
//! statement per request. [`CommandGateway`] abstracts that endpoint so the
//! applier and reconciler can run against HTTP in production and SQLite in
//! tests or local mirrors.

pub mod http;
pub mod sqlite;
pub mod statement;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::{GatewayConfig, GatewayKind};
use crate::errors::GatewayError;

pub use http::HttpGateway;
pub use sqlite::SqliteGateway;
pub use statement::{SqlValue, Statement, TableSpec};

/// One result row, keyed by column name.
pub type RemoteRow = serde_json::Map<String, serde_json::Value>;

/// Result of a mutating statement.
#[derive(Debug, Clone, Default)]
pub struct CommandOutcome {
    pub message: String,
    /// Rows touched, when the gateway reports it.
    pub rows_affected: Option<u64>,
}

/// Response envelope returned by the command endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl QueryResponse {
    /// Turn `success = false` into [`GatewayError::Rejected`].
    pub fn into_result(self) -> Result<Self, GatewayError> {
        if self.success {
            return Ok(self);
        }
        let reason = match (&self.error, self.message.is_empty()) {
            (Some(err), true) => err.clone(),
            (Some(err), false) => format!("{}: {}", self.message, err),
            (None, false) => self.message.clone(),
            (None, true) => "no reason given".to_string(),
        };
        Err(GatewayError::Rejected(reason))
    }

    /// Interpret `data` as a list of row objects.
    pub fn rows(self) -> Result<Vec<RemoteRow>, GatewayError> {
        match self.data {
            serde_json::Value::Null => Ok(Vec::new()),
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::Object(map) => Ok(map),
                    other => Err(GatewayError::DataShape(format!(
                        "expected row object, got {other}"
                    ))),
                })
                .collect(),
            other => Err(GatewayError::DataShape(format!(
                "expected array of rows, got {other}"
            ))),
        }
    }
}

/// Executes statements against the remote store.
#[async_trait]
pub trait CommandGateway: Send + Sync {
    /// Run a query and return its rows.
    async fn execute_select(&self, stmt: &Statement) -> Result<Vec<RemoteRow>, GatewayError>;

    /// Run a mutating statement.
    async fn execute_command(&self, stmt: &Statement) -> Result<CommandOutcome, GatewayError>;
}

/// Build the gateway selected by `[gateway] kind`.
pub fn from_config(config: &GatewayConfig) -> Result<Arc<dyn CommandGateway>, GatewayError> {
    match config.kind {
        GatewayKind::Http => Ok(Arc::new(HttpGateway::from_config(config)?)),
        GatewayKind::Sqlite => {
            let path = config.sqlite_path.as_ref().ok_or_else(|| {
                GatewayError::NotConfigured("gateway.sqlite_path is required for kind = \"sqlite\"".into())
            })?;
            Ok(Arc::new(SqliteGateway::open(path)?))
        }
    }
}
