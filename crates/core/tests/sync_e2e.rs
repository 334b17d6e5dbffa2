//! End-to-end tests for change-log and full-snapshot synchronization.
//!
//! These tests exercise the real `SyncEngine` with:
//! - An in-memory SQLite source whose triggers populate `sml_market_sync`
//! - An in-memory SQLite remote behind `SqliteGateway`
//! - A wrapper gateway that injects failures into chosen commands
//!
//! Time is paused so chunk delays and retry backoff complete instantly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use marketsync_core::config::AppConfig;
use marketsync_core::db::Database;
use marketsync_core::errors::GatewayError;
use marketsync_core::gateway::{self, CommandGateway, CommandOutcome, RemoteRow, SqliteGateway, Statement};
use marketsync_core::models::{Dataset, SyncMode};
use marketsync_core::records::{CustomerRecord, SyncRecord};
use marketsync_core::sync_engine::SyncEngine;

// ===========================================================================
// Helpers
// ===========================================================================

const SOURCE_TABLES: &str = "
CREATE TABLE sml_market_sync (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    table_id INTEGER NOT NULL,
    row_order_ref INTEGER NOT NULL,
    active_code INTEGER NOT NULL
);
CREATE TABLE ic_inventory_price (
    roworder INTEGER PRIMARY KEY AUTOINCREMENT,
    ic_code TEXT, unit_code TEXT, from_qty REAL, to_qty REAL,
    from_date TEXT, to_date TEXT, sale_type INTEGER, sale_price1 REAL,
    status INTEGER, price_type INTEGER, cust_code TEXT, sale_price2 REAL,
    cust_group_1 TEXT, price_mode INTEGER
);
CREATE TABLE ic_inventory (
    roworder INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT, name_1 TEXT, item_type INTEGER, unit_standard TEXT
);
CREATE TABLE ic_unit (code TEXT PRIMARY KEY, name_1 TEXT);
CREATE TABLE ic_inventory_barcode (
    roworder INTEGER PRIMARY KEY AUTOINCREMENT,
    ic_code TEXT, barcode TEXT, unit_code TEXT
);
CREATE TABLE ar_customer (
    roworder INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT, price_level TEXT
);
CREATE TABLE ic_inventory_price_formula (
    roworder INTEGER PRIMARY KEY AUTOINCREMENT,
    ic_code TEXT, unit_code TEXT, sale_type INTEGER,
    price_0 TEXT, price_1 TEXT, price_2 TEXT, price_3 TEXT, price_4 TEXT,
    price_5 TEXT, price_6 TEXT, price_7 TEXT, price_8 TEXT, price_9 TEXT,
    tax_type INTEGER, price_currency INTEGER, currency_code TEXT
);
CREATE TABLE ic_balance (
    ic_code TEXT, warehouse TEXT, ic_unit_code TEXT, balance_qty REAL
);
";

/// Tables with change-log triggers and their `table_id` codes.
const LOGGED_TABLES: [(&str, i64); 5] = [
    ("ic_inventory_price", 1),
    ("ic_inventory", 2),
    ("ic_inventory_barcode", 3),
    ("ar_customer", 4),
    ("ic_inventory_price_formula", 5),
];

fn install_source_schema(db: &Database) {
    let mut ddl = SOURCE_TABLES.to_string();
    for (table, code) in LOGGED_TABLES {
        ddl.push_str(&format!(
            "CREATE TRIGGER {table}_ai AFTER INSERT ON {table} BEGIN
                INSERT INTO sml_market_sync (table_id, row_order_ref, active_code) VALUES ({code}, NEW.roworder, 1);
             END;
             CREATE TRIGGER {table}_au AFTER UPDATE ON {table} BEGIN
                INSERT INTO sml_market_sync (table_id, row_order_ref, active_code) VALUES ({code}, NEW.roworder, 2);
             END;
             CREATE TRIGGER {table}_ad AFTER DELETE ON {table} BEGIN
                INSERT INTO sml_market_sync (table_id, row_order_ref, active_code) VALUES ({code}, OLD.roworder, 3);
             END;"
        ));
    }
    db.conn().execute_batch(&ddl).unwrap();
}

fn source_db() -> Database {
    let db = Database::in_memory().unwrap();
    install_source_schema(&db);
    db
}

fn config(extra: &str) -> AppConfig {
    let config: AppConfig = toml::from_str(&format!(
        r#"
[source]
path = ":memory:"

[gateway]
kind = "sqlite"
sqlite_path = ":memory:"

{extra}
"#
    ))
    .unwrap();
    config.validate().unwrap();
    config
}

/// Passes everything through to a SQLite remote, failing the n-th command
/// (0-based, counted among commands containing `pattern`) for each n in
/// `fail_on`.
struct FlakyGateway {
    inner: Arc<SqliteGateway>,
    pattern: String,
    fail_on: Vec<usize>,
    matched: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

#[async_trait]
impl CommandGateway for FlakyGateway {
    async fn execute_select(&self, stmt: &Statement) -> Result<Vec<RemoteRow>, GatewayError> {
        self.inner.execute_select(stmt).await
    }

    async fn execute_command(&self, stmt: &Statement) -> Result<CommandOutcome, GatewayError> {
        self.commands.lock().unwrap().push(stmt.sql.clone());
        if !self.pattern.is_empty() && stmt.sql.contains(&self.pattern) {
            let n = self.matched.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.contains(&n) {
                return Err(GatewayError::Rejected("injected failure".into()));
            }
        }
        self.inner.execute_command(stmt).await
    }
}

struct Harness {
    engine: SyncEngine,
    remote: Arc<SqliteGateway>,
    gateway: Arc<FlakyGateway>,
}

impl Harness {
    fn new(config: AppConfig) -> Self {
        Self::with_failures(config, "", &[])
    }

    fn with_failures(config: AppConfig, pattern: &str, fail_on: &[usize]) -> Self {
        let remote = Arc::new(SqliteGateway::in_memory().unwrap());
        let gateway = Arc::new(FlakyGateway {
            inner: remote.clone(),
            pattern: pattern.to_string(),
            fail_on: fail_on.to_vec(),
            matched: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
        });
        let dyn_gateway: Arc<dyn CommandGateway> = gateway.clone();
        let engine = SyncEngine::new(config, source_db(), dyn_gateway);
        Self {
            engine,
            remote,
            gateway,
        }
    }

    fn source(&self, sql: &str) {
        self.engine.db().conn().execute_batch(sql).unwrap();
    }

    fn log_len(&self) -> i64 {
        self.engine.db().count_change_log("sml_market_sync").unwrap()
    }

    fn remote_count(&self, table: &str) -> i64 {
        self.remote
            .database()
            .conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    fn remote_customers(&self) -> Vec<(i64, String, String)> {
        let conn = self.remote.database().conn();
        let mut stmt = conn
            .prepare("SELECT row_order_ref, code, price_level FROM ar_customer ORDER BY code")
            .unwrap();
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        rows
    }

    fn commands_containing(&self, needle: &str) -> usize {
        self.gateway
            .commands
            .lock()
            .unwrap()
            .iter()
            .filter(|sql| sql.contains(needle))
            .count()
    }

    async fn seed_remote(&self, create: &Statement, sql: &str) {
        self.remote.execute_command(create).await.unwrap();
        self.remote.database().conn().execute_batch(sql).unwrap();
    }
}

fn insert_customers(h: &Harness, n: i64) {
    let mut sql = String::new();
    for i in 1..=n {
        sql.push_str(&format!(
            "INSERT INTO ar_customer (roworder, code, price_level) VALUES ({i}, 'C{i}', 'A');"
        ));
    }
    h.source(&sql);
}

// ===========================================================================
// Change-log path
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn inserted_customer_is_mirrored_and_log_pruned() {
    let h = Harness::new(config(""));
    h.source("INSERT INTO ar_customer (roworder, code, price_level) VALUES (10, 'C1', 'A');");
    assert_eq!(h.log_len(), 1);

    let report = h.engine.run_cycle().await.unwrap();
    assert!(!report.has_errors());

    let customer = report.entity(Dataset::Customer).unwrap();
    assert_eq!(customer.consumed, 1);
    assert_eq!(customer.inserted, 1);
    assert_eq!(customer.pruned, 1);
    assert_eq!(h.remote_customers(), vec![(10, "C1".into(), "A".into())]);
    assert_eq!(h.log_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn deleted_customer_is_removed_remotely_by_row_ref() {
    let h = Harness::new(config(""));
    h.seed_remote(
        &Statement::create_table(CustomerRecord::TABLE),
        "INSERT INTO ar_customer (row_order_ref, code, price_level) VALUES (11, 'C2', 'B');",
    )
    .await;
    h.source("INSERT INTO sml_market_sync (table_id, row_order_ref, active_code) VALUES (4, 11, 3);");

    let report = h.engine.run_cycle().await.unwrap();
    let customer = report.entity(Dataset::Customer).unwrap();
    assert_eq!(customer.deleted, 1);
    assert_eq!(customer.inserted, 0);
    assert_eq!(h.commands_containing("DELETE FROM ar_customer WHERE row_order_ref IN"), 1);
    assert_eq!(h.remote_count("ar_customer"), 0);
    assert_eq!(h.log_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn updates_converge_to_latest_snapshot() {
    let h = Harness::new(config(""));
    h.source(
        "INSERT INTO ar_customer (roworder, code, price_level) VALUES (10, 'C1', 'A');
         UPDATE ar_customer SET price_level = 'B' WHERE roworder = 10;
         UPDATE ar_customer SET price_level = 'C' WHERE roworder = 10;",
    );
    h.engine.run_cycle().await.unwrap();
    assert_eq!(h.remote_customers(), vec![(10, "C1".into(), "C".into())]);

    // A natural-key change replaces the old remote row.
    h.source("UPDATE ar_customer SET code = 'C9' WHERE roworder = 10;");
    h.engine.run_cycle().await.unwrap();
    assert_eq!(h.remote_customers(), vec![(10, "C9".into(), "C".into())]);
}

#[tokio::test(start_paused = true)]
async fn replaying_an_insert_is_idempotent() {
    let h = Harness::new(config(""));
    h.source("INSERT INTO ar_customer (roworder, code, price_level) VALUES (10, 'C1', 'A');");
    h.engine.run_cycle().await.unwrap();

    h.source("INSERT INTO sml_market_sync (table_id, row_order_ref, active_code) VALUES (4, 10, 1);");
    h.engine.run_cycle().await.unwrap();
    assert_eq!(h.remote_customers(), vec![(10, "C1".into(), "A".into())]);
}

#[tokio::test(start_paused = true)]
async fn row_deleted_before_cycle_converges() {
    let h = Harness::new(config(""));
    h.source(
        "INSERT INTO ar_customer (roworder, code, price_level) VALUES (10, 'C1', 'A');
         DELETE FROM ar_customer WHERE roworder = 10;",
    );

    let report = h.engine.run_cycle().await.unwrap();
    let customer = report.entity(Dataset::Customer).unwrap();
    assert_eq!(customer.consumed, 2);
    assert_eq!(customer.skipped, 1);
    assert_eq!(h.remote_count("ar_customer"), 0);
    assert_eq!(h.log_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn chunking_is_lossless() {
    let h = Harness::new(config("[entities.inventory]\nbatch_size = 50"));
    let mut sql = String::from("BEGIN;");
    for i in 1..=120 {
        sql.push_str(&format!(
            "INSERT INTO ic_inventory (code, name_1, item_type, unit_standard) VALUES ('P{i:04}', 'Item {i}', 0, 'PCS');"
        ));
    }
    sql.push_str("COMMIT;");
    h.source(&sql);

    let report = h.engine.run_cycle().await.unwrap();
    assert_eq!(report.entity(Dataset::Inventory).unwrap().inserted, 120);
    assert_eq!(h.remote_count("ic_inventory"), 120);
    assert_eq!(h.commands_containing("INSERT INTO ic_inventory ("), 3);
    assert_eq!(h.log_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn barcode_is_denormalized_with_names() {
    let h = Harness::new(config(""));
    h.source(
        "INSERT INTO ic_unit (code, name_1) VALUES ('PCS', 'Piece');
         INSERT INTO ic_inventory (code, name_1, item_type, unit_standard) VALUES ('P1', 'Widget', 0, 'PCS');
         INSERT INTO ic_inventory_barcode (ic_code, barcode, unit_code) VALUES ('P1', '885000', 'PCS');
         INSERT INTO ic_inventory_barcode (ic_code, barcode, unit_code) VALUES ('P1', '885001', 'BOX');
         INSERT INTO ic_inventory_barcode (ic_code, barcode, unit_code) VALUES ('P1', '', 'PCS');",
    );

    let report = h.engine.run_cycle().await.unwrap();
    let barcode = report.entity(Dataset::ProductBarcode).unwrap();
    assert_eq!(barcode.inserted, 2);
    // The blank barcode is filtered out at the source.
    assert_eq!(barcode.skipped, 1);

    let names: Vec<(String, String, String)> = {
        let conn = h.remote.database().conn();
        let mut stmt = conn
            .prepare("SELECT barcode, name, unit_name FROM ic_inventory_barcode ORDER BY barcode")
            .unwrap();
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        rows
    };
    assert_eq!(
        names,
        vec![
            ("885000".into(), "Widget".into(), "Piece".into()),
            ("885001".into(), "Widget".into(), "XX".into()),
        ]
    );
}

// ===========================================================================
// Failure policies and prune gating
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn strict_policy_aborts_and_keeps_log() {
    let h = Harness::with_failures(
        config("[entities.price]\nbatch_size = 2"),
        "INSERT INTO ic_inventory_price (",
        &[1],
    );
    let mut sql = String::new();
    for i in 1..=5 {
        sql.push_str(&format!(
            "INSERT INTO ic_inventory_price (ic_code, unit_code, from_qty, to_qty, sale_type, sale_price1, status, price_type, cust_code, sale_price2, cust_group_1, price_mode)
             VALUES ('P{i}', 'PCS', 0, 0, 0, {i}.5, 1, 1, '', 0, '', 0);"
        ));
    }
    h.source(&sql);

    let report = h.engine.run_cycle().await.unwrap();
    assert!(report.has_errors());
    let price = report.entity(Dataset::Price).unwrap();
    let err = price.error.as_deref().unwrap();
    assert!(err.contains("upsert chunk 1"), "unexpected error: {err}");
    assert_eq!(price.prune_deferred, 5);
    assert_eq!(price.pruned, 0);

    // Chunk 0 landed, chunk 2 was never attempted.
    assert_eq!(h.remote_count("ic_inventory_price"), 2);
    assert_eq!(h.commands_containing("INSERT INTO ic_inventory_price ("), 2);
    assert_eq!(h.log_len(), 5);

    // Other datasets still ran.
    assert!(report.entity(Dataset::Customer).unwrap().error.is_none());
}

#[tokio::test(start_paused = true)]
async fn resilient_policy_retries_transient_failure() {
    let h = Harness::with_failures(
        config("[entities.customer]\nbatch_size = 2"),
        "INSERT INTO ar_customer (",
        &[0],
    );
    insert_customers(&h, 5);

    let report = h.engine.run_cycle().await.unwrap();
    let customer = report.entity(Dataset::Customer).unwrap();
    assert!(!customer.is_degraded());
    assert_eq!(customer.inserted, 5);
    assert_eq!(h.remote_count("ar_customer"), 5);
    assert_eq!(h.log_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn resilient_policy_continues_past_exhausted_chunk() {
    let h = Harness::with_failures(
        config("[entities.customer]\nbatch_size = 2"),
        "INSERT INTO ar_customer (",
        &[0, 1, 2],
    );
    insert_customers(&h, 5);

    let report = h.engine.run_cycle().await.unwrap();
    let customer = report.entity(Dataset::Customer).unwrap();
    assert!(customer.error.is_none());
    assert_eq!(customer.failed_rows, 2);
    assert_eq!(customer.inserted, 3);
    assert_eq!(customer.prune_deferred, 5);
    assert_eq!(h.remote_count("ar_customer"), 3);
    assert_eq!(h.log_len(), 5);

    // The next cycle replays the whole drain and fills the gap.
    h.engine.run_cycle().await.unwrap();
    assert_eq!(h.remote_count("ar_customer"), 5);
    assert_eq!(h.log_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn after_classify_gate_prunes_regardless_of_outcome() {
    let h = Harness::with_failures(
        config("[sync]\nprune_gate = \"after_classify\"\n\n[entities.customer]\nbatch_size = 2"),
        "INSERT INTO ar_customer (",
        &[0, 1, 2],
    );
    insert_customers(&h, 5);

    let report = h.engine.run_cycle().await.unwrap();
    let customer = report.entity(Dataset::Customer).unwrap();
    assert_eq!(customer.pruned, 5);
    assert_eq!(customer.failed_rows, 2);
    assert_eq!(h.remote_count("ar_customer"), 3);
    assert_eq!(h.log_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn unreadable_log_row_aborts_only_that_entity() {
    let h = Harness::new(config(""));
    h.source(
        "INSERT INTO ar_customer (roworder, code, price_level) VALUES (10, 'C1', 'A');
         INSERT INTO sml_market_sync (table_id, row_order_ref, active_code) VALUES (4, 'abc', 1);
         INSERT INTO ic_inventory (code, name_1, item_type, unit_standard) VALUES ('P1', 'Widget', 0, 'PCS');",
    );

    let report = h.engine.run_cycle().await.unwrap();
    let customer = report.entity(Dataset::Customer).unwrap();
    assert!(customer.error.is_some());
    assert_eq!(customer.consumed, 0);
    assert_eq!(h.commands_containing("INSERT INTO ar_customer ("), 0);

    assert!(report.entity(Dataset::Inventory).unwrap().error.is_none());
    assert_eq!(h.remote_count("ic_inventory"), 1);
    // The two customer log rows remain.
    assert_eq!(h.log_len(), 2);
}

#[tokio::test(start_paused = true)]
async fn missing_remote_table_defers_prune() {
    let h = Harness::with_failures(config(""), "CREATE TABLE IF NOT EXISTS ar_customer", &[0]);
    h.source("INSERT INTO ar_customer (roworder, code, price_level) VALUES (10, 'C1', 'A');");

    let report = h.engine.run_cycle().await.unwrap();
    let customer = report.entity(Dataset::Customer).unwrap();
    assert!(customer.error.as_deref().unwrap().contains("ar_customer"));
    assert_eq!(customer.prune_deferred, 1);
    assert_eq!(h.log_len(), 1);
}

// ===========================================================================
// Full-snapshot path
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn balance_reconcile_reaches_fixed_point() {
    let h = Harness::new(config(""));
    h.source(
        "INSERT INTO ic_balance VALUES ('P1', 'WH1', 'PCS', 10.0);
         INSERT INTO ic_balance VALUES ('P2', 'WH1', 'PCS', 5.0);
         INSERT INTO ic_balance VALUES ('', 'WH1', 'PCS', 1.0);",
    );

    let report = h.engine.run_cycle().await.unwrap();
    let balance = report.entity(Dataset::Balance).unwrap();
    assert_eq!(balance.mode, SyncMode::FullSnapshot);
    assert_eq!(balance.inserted, 2);
    assert_eq!(h.remote_count("ic_balance"), 2);

    let report = h.engine.run_cycle().await.unwrap();
    let balance = report.entity(Dataset::Balance).unwrap();
    assert_eq!((balance.inserted, balance.updated, balance.deleted), (0, 0, 0));

    // Within epsilon: no write.
    h.source("UPDATE ic_balance SET balance_qty = 10.0005 WHERE ic_code = 'P1';");
    let report = h.engine.run_cycle().await.unwrap();
    assert_eq!(report.entity(Dataset::Balance).unwrap().updated, 0);

    // Beyond epsilon: one update.
    h.source("UPDATE ic_balance SET balance_qty = 10.01 WHERE ic_code = 'P1';");
    let report = h.engine.run_cycle().await.unwrap();
    assert_eq!(report.entity(Dataset::Balance).unwrap().updated, 1);
    let qty: f64 = h
        .remote
        .database()
        .conn()
        .query_row("SELECT balance_qty FROM ic_balance WHERE ic_code = 'P1'", [], |row| row.get(0))
        .unwrap();
    assert!((qty - 10.01).abs() < 1e-9);

    // Source-side removal becomes a remote delete.
    h.source("DELETE FROM ic_balance WHERE ic_code = 'P2';");
    let report = h.engine.run_cycle().await.unwrap();
    assert_eq!(report.entity(Dataset::Balance).unwrap().deleted, 1);
    assert_eq!(h.remote_count("ic_balance"), 1);
}

#[tokio::test(start_paused = true)]
async fn reconcile_pages_through_remote_extent() {
    let h = Harness::new(config("[sync]\npage_size = 3"));
    let mut sql = String::new();
    for i in 1..=10 {
        sql.push_str(&format!("INSERT INTO ic_balance VALUES ('P{i:02}', 'WH1', 'PCS', {i});"));
    }
    h.source(&sql);
    h.engine.run_cycle().await.unwrap();
    assert_eq!(h.remote_count("ic_balance"), 10);

    // Every remote row is seen across pages, so nothing is re-inserted.
    let report = h.engine.run_cycle().await.unwrap();
    let balance = report.entity(Dataset::Balance).unwrap();
    assert_eq!((balance.inserted, balance.updated, balance.deleted), (0, 0, 0));
}

#[tokio::test(start_paused = true)]
async fn change_log_entity_in_full_snapshot_mode() {
    let h = Harness::new(config("[entities.customer]\nmode = \"full_snapshot\""));
    h.seed_remote(
        &Statement::create_table(CustomerRecord::TABLE),
        "INSERT INTO ar_customer (row_order_ref, code, price_level) VALUES (99, 'STRAY', 'A');",
    )
    .await;
    h.source("INSERT INTO ar_customer (roworder, code, price_level) VALUES (10, 'C1', 'A');");

    let report = h.engine.run_cycle().await.unwrap();
    let customer = report.entity(Dataset::Customer).unwrap();
    assert_eq!(customer.mode, SyncMode::FullSnapshot);
    assert_eq!(customer.inserted, 1);
    assert_eq!(customer.deleted, 1);
    assert_eq!(customer.pruned, 1);
    assert_eq!(h.remote_customers(), vec![(10, "C1".into(), "A".into())]);
    assert_eq!(h.log_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn malformed_remote_row_aborts_reconcile() {
    let h = Harness::new(config(""));
    h.remote
        .execute_command(&Statement::raw(
            "CREATE TABLE ic_balance (ic_code TEXT, wh_code TEXT, unit_code TEXT, balance_qty TEXT)",
        ))
        .await
        .unwrap();
    h.remote
        .database()
        .conn()
        .execute_batch("INSERT INTO ic_balance VALUES ('P1', 'WH1', 'PCS', 'lots');")
        .unwrap();
    h.source("INSERT INTO ic_balance VALUES ('P1', 'WH1', 'PCS', 1.0);");

    let report = h.engine.run_cycle().await.unwrap();
    let balance = report.entity(Dataset::Balance).unwrap();
    assert!(balance.error.as_deref().unwrap().contains("balance_qty"));
    assert_eq!(h.remote_count("ic_balance"), 1);
}

#[tokio::test(start_paused = true)]
async fn reconcile_deletes_full_default_size_chunk() {
    let h = Harness::new(config(""));
    let mut sql = String::from("BEGIN;");
    for i in 0..1200 {
        sql.push_str(&format!("INSERT INTO ic_balance VALUES ('P{i:05}', 'WH1', 'PCS', {i});"));
    }
    sql.push_str("INSERT INTO ic_balance VALUES ('KEEP', 'WH1', 'PCS', 1.0);COMMIT;");
    h.source(&sql);
    h.engine.run_cycle().await.unwrap();
    assert_eq!(h.remote_count("ic_balance"), 1201);

    h.source("DELETE FROM ic_balance WHERE ic_code <> 'KEEP';");
    let report = h.engine.run_cycle().await.unwrap();
    let balance = report.entity(Dataset::Balance).unwrap();
    assert!(balance.error.is_none());
    assert_eq!(balance.failed_rows, 0);
    assert_eq!(balance.deleted, 1200);
    assert_eq!(h.remote_count("ic_balance"), 1);

    let report = h.engine.run_cycle().await.unwrap();
    let balance = report.entity(Dataset::Balance).unwrap();
    assert_eq!((balance.inserted, balance.updated, balance.deleted), (0, 0, 0));
}

#[tokio::test(start_paused = true)]
async fn reconcile_reports_rows_that_landed() {
    let h = Harness::with_failures(
        config("[entities.balance]\nbatch_size = 2"),
        "INSERT INTO ic_balance (",
        &[0, 1, 2],
    );
    h.source(
        "INSERT INTO ic_balance VALUES ('P1', 'WH1', 'PCS', 1.0);
         INSERT INTO ic_balance VALUES ('P2', 'WH1', 'PCS', 2.0);
         INSERT INTO ic_balance VALUES ('P3', 'WH1', 'PCS', 3.0);",
    );

    let report = h.engine.run_cycle().await.unwrap();
    let balance = report.entity(Dataset::Balance).unwrap();
    assert_eq!(balance.inserted, 1);
    assert_eq!(balance.failed_rows, 2);
    assert_eq!(h.remote_count("ic_balance"), 1);

    // Updates are counted apart from inserts.
    h.source("UPDATE ic_balance SET balance_qty = 9.0 WHERE ic_code = 'P3';");
    let report = h.engine.run_cycle().await.unwrap();
    let balance = report.entity(Dataset::Balance).unwrap();
    assert_eq!((balance.inserted, balance.updated, balance.failed_rows), (2, 1, 0));
    assert_eq!(h.remote_count("ic_balance"), 3);
}

// ===========================================================================
// File-backed stores
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn config_file_drives_file_backed_stores() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("erp.db");
    let remote_path = dir.path().join("mirror.db");
    let config_path = dir.path().join("marketsync.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[source]
path = "{}"

[gateway]
kind = "sqlite"
sqlite_path = "{}"

[sync]
chunk_delay_ms = 0
"#,
            source_path.display(),
            remote_path.display()
        ),
    )
    .unwrap();

    let config = AppConfig::load_and_resolve(&config_path).unwrap();
    let db = Database::new(&config.source.path).unwrap();
    install_source_schema(&db);
    db.conn()
        .execute_batch("INSERT INTO ar_customer (roworder, code, price_level) VALUES (10, 'C1', 'A');")
        .unwrap();

    let remote = gateway::from_config(&config.gateway).unwrap();
    let engine = SyncEngine::new(config, db, remote);
    let report = engine.run_cycle().await.unwrap();
    assert!(!report.has_errors());
    assert_eq!(engine.pending_changes().unwrap(), 0);
    drop(engine);

    let mirror = SqliteGateway::open(&remote_path).unwrap();
    let rows = mirror
        .execute_select(&Statement::raw("SELECT code, price_level FROM ar_customer"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["code"], "C1");
    assert_eq!(rows[0]["price_level"], "A");
}
