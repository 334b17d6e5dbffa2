//! TOML-based configuration system for marketsync.
//!
//! Secrets (the gateway bearer token) are stored as `_env` fields that
//! reference environment variable names. The actual values are resolved at
//! runtime via [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::models::{Dataset, SyncMode};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Daemon / polling settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Source ERP database.
    pub source: SourceConfig,

    /// Remote command endpoint.
    pub gateway: GatewayConfig,

    /// Engine-wide sync behaviour.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Per-dataset overrides.
    #[serde(default)]
    pub entities: EntitiesConfig,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Daemon / polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between polling cycles (default 60).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_poll_interval() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            log_level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Source database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,

    /// Trigger-populated change-log table. Default `sml_market_sync`.
    #[serde(default = "default_change_log_table")]
    pub change_log_table: String,
}

fn default_change_log_table() -> String {
    "sml_market_sync".into()
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Which [`crate::gateway::CommandGateway`] implementation to build.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    /// JSON over HTTP (`/pgselect`, `/pgcommand`).
    #[default]
    Http,
    /// A local SQLite file.
    Sqlite,
}

/// How statement parameters reach the endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamMode {
    /// Render parameters as escaped literals into `query`.
    #[default]
    Inline,
    /// Send `$n` placeholders plus a `params` array.
    Bound,
}

/// Remote command endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub kind: GatewayKind,

    /// Base URL including the API version, e.g. `http://host:8080/v1`.
    #[serde(default)]
    pub base_url: String,

    #[serde(default = "default_select_path")]
    pub select_path: String,

    #[serde(default = "default_command_path")]
    pub command_path: String,

    /// Overall timeout per request (default 120).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub param_mode: ParamMode,

    /// Environment variable holding a bearer token, if the endpoint needs one.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Database file for `kind = "sqlite"`.
    #[serde(default)]
    pub sqlite_path: Option<PathBuf>,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_select_path() -> String {
    "/pgselect".into()
}
fn default_command_path() -> String {
    "/pgcommand".into()
}
fn default_timeout() -> u64 {
    120
}

// ---------------------------------------------------------------------------
// Sync behaviour
// ---------------------------------------------------------------------------

/// When consumed change-log ids are deleted.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PruneGate {
    /// Prune right after classification, whatever the remote outcome.
    AfterClassify,
    /// Prune only after every chunk was applied.
    #[default]
    AfterApply,
}

/// Engine-wide sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Change-log ids per prune statement (default 100).
    #[serde(default = "default_prune_batch_size")]
    pub prune_batch_size: usize,

    /// Pause between consecutive chunks, in milliseconds (default 100).
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,

    #[serde(default)]
    pub prune_gate: PruneGate,

    /// Stop the whole cycle at the first dataset that fails.
    #[serde(default)]
    pub halt_on_entity_error: bool,

    /// Remote rows per page when reading a full extent (default 10 000).
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Tolerance for numeric comparisons during reconciliation.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

fn default_prune_batch_size() -> usize {
    100
}
fn default_chunk_delay_ms() -> u64 {
    100
}
fn default_page_size() -> usize {
    10_000
}
fn default_epsilon() -> f64 {
    0.001
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            prune_batch_size: default_prune_batch_size(),
            chunk_delay_ms: default_chunk_delay_ms(),
            prune_gate: PruneGate::default(),
            halt_on_entity_error: false,
            page_size: default_page_size(),
            epsilon: default_epsilon(),
        }
    }
}

impl SyncConfig {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Per-entity settings
// ---------------------------------------------------------------------------

/// What to do when a chunk still fails after its attempts are used up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Retry with backoff, then count the rows as failed and move on.
    ContinueOnChunkFailure,
    /// Single attempt; the first failure ends the dataset's cycle.
    AbortOnFirstFailure,
}

/// Fully resolved settings for one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySettings {
    pub enabled: bool,
    pub mode: SyncMode,
    pub batch_size: usize,
    pub failure_policy: FailurePolicy,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl EntitySettings {
    /// Built-in defaults, sized to each dataset's row width.
    pub fn defaults_for(dataset: Dataset) -> Self {
        let resilient = |batch_size| Self {
            enabled: true,
            mode: SyncMode::ChangeLog,
            batch_size,
            failure_policy: FailurePolicy::ContinueOnChunkFailure,
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
        };
        match dataset {
            Dataset::Price => Self {
                failure_policy: FailurePolicy::AbortOnFirstFailure,
                max_attempts: 1,
                ..resilient(50)
            },
            Dataset::Customer | Dataset::PriceFormula => resilient(50),
            Dataset::Inventory | Dataset::ProductBarcode => resilient(500),
            Dataset::Balance => Self {
                mode: SyncMode::FullSnapshot,
                ..resilient(1000)
            },
        }
    }
}

/// Optional overrides for one dataset, as written in `[entities.<name>]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityConfig {
    pub enabled: Option<bool>,
    pub mode: Option<SyncMode>,
    pub batch_size: Option<usize>,
    pub failure_policy: Option<FailurePolicy>,
    pub max_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

impl EntityConfig {
    fn apply_to(&self, mut settings: EntitySettings) -> EntitySettings {
        if let Some(v) = self.enabled {
            settings.enabled = v;
        }
        if let Some(v) = self.mode {
            settings.mode = v;
        }
        if let Some(v) = self.batch_size {
            settings.batch_size = v;
        }
        if let Some(v) = self.failure_policy {
            settings.failure_policy = v;
        }
        if let Some(v) = self.max_attempts {
            settings.max_attempts = v;
        }
        if let Some(v) = self.retry_delay_ms {
            settings.retry_delay = Duration::from_millis(v);
        }
        settings
    }
}

/// `[entities]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitiesConfig {
    #[serde(default)]
    pub price: EntityConfig,
    #[serde(default)]
    pub inventory: EntityConfig,
    #[serde(default)]
    pub product_barcode: EntityConfig,
    #[serde(default)]
    pub customer: EntityConfig,
    #[serde(default)]
    pub price_formula: EntityConfig,
    #[serde(default)]
    pub balance: EntityConfig,
}

impl EntitiesConfig {
    fn overrides(&self, dataset: Dataset) -> &EntityConfig {
        match dataset {
            Dataset::Price => &self.price,
            Dataset::Inventory => &self.inventory,
            Dataset::ProductBarcode => &self.product_barcode,
            Dataset::Customer => &self.customer,
            Dataset::PriceFormula => &self.price_formula,
            Dataset::Balance => &self.balance,
        }
    }

    /// Defaults for `dataset` with any configured overrides applied.
    pub fn settings(&self, dataset: Dataset) -> EntitySettings {
        self.overrides(dataset)
            .apply_to(EntitySettings::defaults_for(dataset))
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// Does **not** resolve environment variables; call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables.
    ///
    /// A missing variable logs a warning but does not fail; the endpoint
    /// may not need a token.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref env_name) = self.gateway.token_env {
            self.gateway.token = resolve_optional_env(env_name, "gateway.token_env");
        }
        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.poll_interval_secs == 0 {
            return Err(invalid("daemon.poll_interval_secs", "poll interval must be > 0"));
        }
        if self.source.path.as_os_str().is_empty() {
            return Err(invalid("source.path", "source database path must not be empty"));
        }
        if !is_identifier(&self.source.change_log_table) {
            return Err(invalid(
                "source.change_log_table",
                "must contain only letters, digits and underscores",
            ));
        }

        match self.gateway.kind {
            GatewayKind::Http => {
                let url = &self.gateway.base_url;
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(invalid("gateway.base_url", "must be an http(s) URL"));
                }
            }
            GatewayKind::Sqlite => {
                if self.gateway.sqlite_path.is_none() {
                    return Err(invalid(
                        "gateway.sqlite_path",
                        "required when gateway.kind = \"sqlite\"",
                    ));
                }
            }
        }
        if self.gateway.timeout_secs == 0 {
            return Err(invalid("gateway.timeout_secs", "timeout must be > 0"));
        }

        if self.sync.prune_batch_size == 0 {
            return Err(invalid("sync.prune_batch_size", "batch size must be > 0"));
        }
        if self.sync.page_size == 0 {
            return Err(invalid("sync.page_size", "page size must be > 0"));
        }
        if !(self.sync.epsilon.is_finite() && self.sync.epsilon > 0.0) {
            return Err(invalid("sync.epsilon", "epsilon must be a positive number"));
        }

        for dataset in Dataset::CYCLE_ORDER {
            let settings = self.entities.settings(dataset);
            if settings.batch_size == 0 {
                return Err(invalid(
                    &format!("entities.{dataset}.batch_size"),
                    "batch size must be > 0",
                ));
            }
            if settings.max_attempts == 0 {
                return Err(invalid(
                    &format!("entities.{dataset}.max_attempts"),
                    "at least one attempt is required",
                ));
            }
            if dataset.entity_kind().is_none() && settings.mode == SyncMode::ChangeLog {
                return Err(invalid(
                    &format!("entities.{dataset}.mode"),
                    "this dataset has no change log; use \"full_snapshot\"",
                ));
            }
        }

        if self.sync.prune_gate == PruneGate::AfterClassify {
            warn!(
                "sync.prune_gate = \"after_classify\": change-log rows are pruned even when the remote apply fails"
            );
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        detail: detail.into(),
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
