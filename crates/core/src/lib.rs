//! marketsync core library.
//!
//! This crate provides the components for mirroring ERP master data into a
//! remote store: configuration, source database access, change-log
//! classification, chunked remote apply, log pruning, full-snapshot
//! reconciliation, the remote command gateway, and the sync engine.

pub mod applier;
pub mod classifier;
pub mod config;
pub mod db;
pub mod errors;
pub mod gateway;
pub mod models;
pub mod pruner;
pub mod reconciler;
pub mod records;
pub mod sync_engine;

// Re-exports for convenience.
pub use config::AppConfig;
pub use db::Database;
pub use gateway::CommandGateway;
pub use sync_engine::SyncEngine;
