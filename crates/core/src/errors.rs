//! Error types for the marketsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Remote gateway errors
// ---------------------------------------------------------------------------

/// Errors raised while talking to the remote command endpoint.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport failure: DNS, TLS, connection reset, timeout.
    #[error("gateway connectivity error: {0}")]
    Connectivity(#[from] reqwest::Error),

    /// The endpoint answered with a non-success HTTP status.
    #[error("gateway returned HTTP {status}: {body}")]
    HttpStatus {
        status: u16,
        body: String,
    },

    /// The endpoint reported `success = false`.
    #[error("remote rejected statement: {0}")]
    Rejected(String),

    /// The response did not have the expected shape or types.
    #[error("unexpected response shape: {0}")]
    DataShape(String),

    /// A parameter could not be rendered into statement text.
    #[error("cannot encode statement parameter: {0}")]
    Encode(String),

    /// Required gateway settings are missing or unusable.
    #[error("gateway not configured: {0}")]
    NotConfigured(String),

    /// Error from a SQLite-backed gateway.
    #[error("sqlite gateway error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl GatewayError {
    /// `true` for failures that happened before the remote saw the statement.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}

// ---------------------------------------------------------------------------
// Sync engine errors
// ---------------------------------------------------------------------------

/// Errors from classification, apply, and reconciliation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another sync cycle is already running.
    #[error("sync already in progress (engine up since {started_at})")]
    AlreadyRunning {
        started_at: String,
    },

    /// A source read failed; the entity's cycle was aborted.
    #[error("source read failed: {0}")]
    Source(#[from] DatabaseError),

    /// A remote call failed outside of chunked apply.
    #[error("remote call failed: {0}")]
    Gateway(#[from] GatewayError),

    /// A chunk failed under `AbortOnFirstFailure`; later chunks were not sent.
    #[error("{entity}: {phase} chunk {chunk} ({rows} rows) failed: {source}")]
    ChunkFailed {
        entity: String,
        phase: String,
        chunk: usize,
        rows: usize,
        #[source]
        source: GatewayError,
    },

    /// The remote table could not be created or verified.
    #[error("remote table '{table}' unavailable: {source}")]
    RemoteSchema {
        table: String,
        #[source]
        source: GatewayError,
    },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the source SQLite store.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error (query, cursor, or column conversion).
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A row was read but is missing a required field.
    #[error("malformed row in '{table}' ({at}): {detail}")]
    DataShape {
        table: String,
        /// Which row: `roworder N` for snapshots, the natural key for extents.
        at: String,
        detail: String,
    },

    /// A change-log column carried an unknown code.
    #[error("unknown {column} code {value}")]
    InvalidCode {
        column: String,
        value: i64,
    },
}

// CoreError implements `std::error::Error` via `thiserror`, which means
// `anyhow::Error: From<CoreError>` is already provided by the blanket impl
// in `anyhow`. No manual `From` impl is needed.
