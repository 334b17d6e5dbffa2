//! Typed rows for every synchronized dataset.
//!
//! Each record knows its source query, its remote table, and how to turn
//! itself into statement parameters. [`EntitySnapshot`] tags a record with
//! the change-log kind it came from.

use std::collections::HashMap;
use std::hash::Hash;

use serde_json::Value;

use crate::errors::GatewayError;
use crate::gateway::statement::{Column, SqlValue, TableSpec};
use crate::gateway::RemoteRow;
use crate::models::EntityKind;

/// Canonical string form of a natural key, usable as a map key.
pub type NaturalKey = Vec<String>;

/// Behaviour shared by every synchronized record type.
pub trait SyncRecord: Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Remote table the record is written to.
    const TABLE: &'static TableSpec;

    /// `SELECT ... FROM ...` over the source table, without a `WHERE`.
    /// Column order matches [`SyncRecord::from_source`].
    const SOURCE_SELECT: &'static str;

    /// Extra predicate applied to every source read. Rows it excludes are
    /// treated as absent rather than malformed.
    const SOURCE_FILTER: Option<&'static str> = None;

    fn from_source(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self>;

    fn from_remote(row: &RemoteRow) -> Result<Self, GatewayError>;

    /// Check required fields. Returns a description of the first problem.
    fn validate(&self) -> Result<(), String>;

    /// One value per column of [`SyncRecord::TABLE`], in column order.
    fn values(&self) -> Vec<SqlValue>;

    /// Values of the natural-key columns, in key order.
    fn key_values(&self) -> Vec<SqlValue> {
        let values = self.values();
        Self::TABLE
            .key
            .iter()
            .filter_map(|k| Self::TABLE.columns.iter().position(|c| c.name == *k))
            .map(|idx| values[idx].clone())
            .collect()
    }

    fn natural_key(&self) -> NaturalKey {
        self.key_values().iter().map(key_part).collect()
    }

    /// `true` if any column differs. Numeric columns compare with
    /// `|a - b| > epsilon`.
    fn differs(&self, other: &Self, epsilon: f64) -> bool {
        self.values()
            .iter()
            .zip(other.values().iter())
            .any(|(a, b)| value_differs(a, b, epsilon))
    }
}

/// A record fed by the change log, addressable by its source `roworder`.
pub trait ChangeLogged: SyncRecord {
    const KIND: EntityKind;

    /// Source column holding the stable `roworder`.
    const SOURCE_ROW_REF: &'static str;

    fn row_ref(&self) -> i64;

    fn into_snapshot(self) -> EntitySnapshot;
}

/// Round to the three decimals a remote NUMERIC(18,3) column keeps.
fn round_scale(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn key_part(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => String::new(),
        SqlValue::Integer(v) => v.to_string(),
        // Remote numerics are NUMERIC(18,3).
        SqlValue::Real(v) => format!("{v:.3}"),
        SqlValue::Text(s) => s.clone(),
    }
}

fn value_differs(a: &SqlValue, b: &SqlValue, epsilon: f64) -> bool {
    match (a, b) {
        (SqlValue::Real(x), SqlValue::Real(y)) => (x - y).abs() > epsilon,
        (SqlValue::Real(x), SqlValue::Integer(y)) | (SqlValue::Integer(y), SqlValue::Real(x)) => {
            (x - *y as f64).abs() > epsilon
        }
        _ => a != b,
    }
}

/// Drop earlier items whose key repeats, keeping the last occurrence at the
/// position of the first.
pub fn dedupe_last_wins<T, K, F>(items: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::with_capacity(items.len());
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        let k = key(&item);
        match index.get(&k) {
            Some(&pos) => out[pos] = item,
            None => {
                index.insert(k, out.len());
                out.push(item);
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Remote row parsing
// ---------------------------------------------------------------------------

fn field<'a>(row: &'a RemoteRow, col: &str) -> Result<&'a Value, GatewayError> {
    row.get(col)
        .ok_or_else(|| GatewayError::DataShape(format!("missing column '{col}'")))
}

fn remote_text(row: &RemoteRow, col: &str) -> Result<String, GatewayError> {
    match field(row, col)? {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Ok(String::new()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(GatewayError::DataShape(format!(
            "column '{col}': expected text, got {other}"
        ))),
    }
}

fn remote_opt_text(row: &RemoteRow, col: &str) -> Result<Option<String>, GatewayError> {
    match field(row, col)? {
        Value::Null => Ok(None),
        _ => remote_text(row, col).map(Some),
    }
}

fn remote_real(row: &RemoteRow, col: &str) -> Result<f64, GatewayError> {
    let value = field(row, col)?;
    let bad = || GatewayError::DataShape(format!("column '{col}': expected number, got {value}"));
    match value {
        Value::Null => Ok(0.0),
        Value::Number(n) => n.as_f64().ok_or_else(bad),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| bad()),
        _ => Err(bad()),
    }
}

fn remote_int(row: &RemoteRow, col: &str) -> Result<i64, GatewayError> {
    let value = field(row, col)?;
    let bad = || GatewayError::DataShape(format!("column '{col}': expected integer, got {value}"));
    match value {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(bad),
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| bad()),
        _ => Err(bad()),
    }
}

fn opt_text(value: &Option<String>) -> SqlValue {
    match value {
        Some(s) => SqlValue::Text(s.clone()),
        None => SqlValue::Null,
    }
}

fn require(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("required field '{field}' is empty"))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Price
// ---------------------------------------------------------------------------

const PRICE_TABLE: TableSpec = TableSpec {
    name: "ic_inventory_price",
    columns: &[
        Column { name: "row_order_ref", sql_type: "BIGINT" },
        Column { name: "ic_code", sql_type: "VARCHAR(50)" },
        Column { name: "unit_code", sql_type: "VARCHAR(20)" },
        Column { name: "from_qty", sql_type: "NUMERIC(18,3)" },
        Column { name: "to_qty", sql_type: "NUMERIC(18,3)" },
        Column { name: "from_date", sql_type: "DATE" },
        Column { name: "to_date", sql_type: "DATE" },
        Column { name: "sale_type", sql_type: "INTEGER" },
        Column { name: "sale_price1", sql_type: "NUMERIC(18,3)" },
        Column { name: "status", sql_type: "INTEGER" },
        Column { name: "price_type", sql_type: "INTEGER" },
        Column { name: "cust_code", sql_type: "VARCHAR(50)" },
        Column { name: "sale_price2", sql_type: "NUMERIC(18,3)" },
        Column { name: "cust_group_1", sql_type: "VARCHAR(50)" },
        Column { name: "price_mode", sql_type: "INTEGER" },
    ],
    key: &["ic_code", "unit_code", "from_qty", "cust_code", "price_type"],
};

/// A row of `ic_inventory_price`.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRecord {
    pub row_ref: i64,
    pub ic_code: String,
    pub unit_code: String,
    pub from_qty: f64,
    pub to_qty: f64,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub sale_type: i64,
    pub sale_price1: f64,
    pub status: i64,
    pub price_type: i64,
    pub cust_code: String,
    pub sale_price2: f64,
    pub cust_group_1: String,
    pub price_mode: i64,
}

impl SyncRecord for PriceRecord {
    const TABLE: &'static TableSpec = &PRICE_TABLE;
    const SOURCE_SELECT: &'static str = "SELECT roworder, ic_code, unit_code, from_qty, to_qty, \
        from_date, to_date, sale_type, sale_price1, status, price_type, cust_code, sale_price2, \
        cust_group_1, price_mode FROM ic_inventory_price";

    fn from_source(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            row_ref: row.get(0)?,
            ic_code: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            unit_code: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            from_qty: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
            to_qty: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
            from_date: row.get(5)?,
            to_date: row.get(6)?,
            sale_type: row.get::<_, Option<i64>>(7)?.unwrap_or(0),
            sale_price1: row.get::<_, Option<f64>>(8)?.unwrap_or(0.0),
            status: row.get::<_, Option<i64>>(9)?.unwrap_or(0),
            price_type: row.get::<_, Option<i64>>(10)?.unwrap_or(0),
            cust_code: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
            sale_price2: row.get::<_, Option<f64>>(12)?.unwrap_or(0.0),
            cust_group_1: row.get::<_, Option<String>>(13)?.unwrap_or_default(),
            price_mode: row.get::<_, Option<i64>>(14)?.unwrap_or(0),
        })
    }

    fn from_remote(row: &RemoteRow) -> Result<Self, GatewayError> {
        Ok(Self {
            row_ref: remote_int(row, "row_order_ref")?,
            ic_code: remote_text(row, "ic_code")?,
            unit_code: remote_text(row, "unit_code")?,
            from_qty: remote_real(row, "from_qty")?,
            to_qty: remote_real(row, "to_qty")?,
            from_date: remote_opt_text(row, "from_date")?,
            to_date: remote_opt_text(row, "to_date")?,
            sale_type: remote_int(row, "sale_type")?,
            sale_price1: remote_real(row, "sale_price1")?,
            status: remote_int(row, "status")?,
            price_type: remote_int(row, "price_type")?,
            cust_code: remote_text(row, "cust_code")?,
            sale_price2: remote_real(row, "sale_price2")?,
            cust_group_1: remote_text(row, "cust_group_1")?,
            price_mode: remote_int(row, "price_mode")?,
        })
    }

    fn validate(&self) -> Result<(), String> {
        require("ic_code", &self.ic_code)?;
        require("unit_code", &self.unit_code)
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.row_ref.into(),
            self.ic_code.as_str().into(),
            self.unit_code.as_str().into(),
            round_scale(self.from_qty).into(),
            self.to_qty.into(),
            opt_text(&self.from_date),
            opt_text(&self.to_date),
            self.sale_type.into(),
            self.sale_price1.into(),
            self.status.into(),
            self.price_type.into(),
            self.cust_code.as_str().into(),
            self.sale_price2.into(),
            self.cust_group_1.as_str().into(),
            self.price_mode.into(),
        ]
    }
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

const INVENTORY_TABLE: TableSpec = TableSpec {
    name: "ic_inventory",
    columns: &[
        Column { name: "row_order_ref", sql_type: "BIGINT" },
        Column { name: "ic_code", sql_type: "VARCHAR(50)" },
        Column { name: "name", sql_type: "VARCHAR(255)" },
        Column { name: "item_type", sql_type: "INTEGER" },
        Column { name: "unit_standard_code", sql_type: "VARCHAR(20)" },
    ],
    key: &["ic_code"],
};

/// A product master row (`ic_inventory`).
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryRecord {
    pub row_ref: i64,
    pub ic_code: String,
    pub name: String,
    pub item_type: i64,
    pub unit_standard_code: String,
}

impl SyncRecord for InventoryRecord {
    const TABLE: &'static TableSpec = &INVENTORY_TABLE;
    const SOURCE_SELECT: &'static str =
        "SELECT roworder, code, name_1, item_type, unit_standard FROM ic_inventory";

    fn from_source(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            row_ref: row.get(0)?,
            ic_code: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            item_type: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
            unit_standard_code: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        })
    }

    fn from_remote(row: &RemoteRow) -> Result<Self, GatewayError> {
        Ok(Self {
            row_ref: remote_int(row, "row_order_ref")?,
            ic_code: remote_text(row, "ic_code")?,
            name: remote_text(row, "name")?,
            item_type: remote_int(row, "item_type")?,
            unit_standard_code: remote_text(row, "unit_standard_code")?,
        })
    }

    fn validate(&self) -> Result<(), String> {
        require("ic_code", &self.ic_code)
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.row_ref.into(),
            self.ic_code.as_str().into(),
            self.name.as_str().into(),
            self.item_type.into(),
            self.unit_standard_code.as_str().into(),
        ]
    }
}

// ---------------------------------------------------------------------------
// Product barcode
// ---------------------------------------------------------------------------

const BARCODE_TABLE: TableSpec = TableSpec {
    name: "ic_inventory_barcode",
    columns: &[
        Column { name: "row_order_ref", sql_type: "BIGINT" },
        Column { name: "ic_code", sql_type: "VARCHAR(50)" },
        Column { name: "barcode", sql_type: "VARCHAR(100)" },
        Column { name: "name", sql_type: "VARCHAR(255)" },
        Column { name: "unit_code", sql_type: "VARCHAR(20)" },
        Column { name: "unit_name", sql_type: "VARCHAR(100)" },
    ],
    key: &["ic_code", "barcode"],
};

/// A barcode row, denormalized with product and unit names.
#[derive(Debug, Clone, PartialEq)]
pub struct BarcodeRecord {
    pub row_ref: i64,
    pub ic_code: String,
    pub barcode: String,
    pub name: String,
    pub unit_code: String,
    pub unit_name: String,
}

impl SyncRecord for BarcodeRecord {
    const TABLE: &'static TableSpec = &BARCODE_TABLE;
    const SOURCE_SELECT: &'static str = "SELECT b.roworder, b.ic_code, b.barcode, \
        COALESCE((SELECT i.name_1 FROM ic_inventory i WHERE i.code = b.ic_code), 'XX'), \
        b.unit_code, \
        COALESCE((SELECT u.name_1 FROM ic_unit u WHERE u.code = b.unit_code), 'XX') \
        FROM ic_inventory_barcode b";
    const SOURCE_FILTER: Option<&'static str> = Some("b.barcode IS NOT NULL AND b.barcode <> ''");

    fn from_source(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            row_ref: row.get(0)?,
            ic_code: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            barcode: row.get(2)?,
            name: row.get(3)?,
            unit_code: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            unit_name: row.get(5)?,
        })
    }

    fn from_remote(row: &RemoteRow) -> Result<Self, GatewayError> {
        Ok(Self {
            row_ref: remote_int(row, "row_order_ref")?,
            ic_code: remote_text(row, "ic_code")?,
            barcode: remote_text(row, "barcode")?,
            name: remote_text(row, "name")?,
            unit_code: remote_text(row, "unit_code")?,
            unit_name: remote_text(row, "unit_name")?,
        })
    }

    fn validate(&self) -> Result<(), String> {
        require("ic_code", &self.ic_code)?;
        require("barcode", &self.barcode)
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.row_ref.into(),
            self.ic_code.as_str().into(),
            self.barcode.as_str().into(),
            self.name.as_str().into(),
            self.unit_code.as_str().into(),
            self.unit_name.as_str().into(),
        ]
    }
}

// ---------------------------------------------------------------------------
// Customer
// ---------------------------------------------------------------------------

const CUSTOMER_TABLE: TableSpec = TableSpec {
    name: "ar_customer",
    columns: &[
        Column { name: "row_order_ref", sql_type: "BIGINT" },
        Column { name: "code", sql_type: "VARCHAR(50)" },
        Column { name: "price_level", sql_type: "VARCHAR(10)" },
    ],
    key: &["code"],
};

/// A customer row (`ar_customer`).
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRecord {
    pub row_ref: i64,
    pub code: String,
    pub price_level: String,
}

impl SyncRecord for CustomerRecord {
    const TABLE: &'static TableSpec = &CUSTOMER_TABLE;
    const SOURCE_SELECT: &'static str = "SELECT roworder, code, price_level FROM ar_customer";
    const SOURCE_FILTER: Option<&'static str> = Some("code IS NOT NULL AND code <> ''");

    fn from_source(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            row_ref: row.get(0)?,
            code: row.get(1)?,
            price_level: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        })
    }

    fn from_remote(row: &RemoteRow) -> Result<Self, GatewayError> {
        Ok(Self {
            row_ref: remote_int(row, "row_order_ref")?,
            code: remote_text(row, "code")?,
            price_level: remote_text(row, "price_level")?,
        })
    }

    fn validate(&self) -> Result<(), String> {
        require("code", &self.code)
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.row_ref.into(),
            self.code.as_str().into(),
            self.price_level.as_str().into(),
        ]
    }
}

// ---------------------------------------------------------------------------
// Price formula
// ---------------------------------------------------------------------------

const PRICE_FORMULA_TABLE: TableSpec = TableSpec {
    name: "ic_inventory_price_formula",
    columns: &[
        Column { name: "row_order_ref", sql_type: "BIGINT" },
        Column { name: "ic_code", sql_type: "VARCHAR(50)" },
        Column { name: "unit_code", sql_type: "VARCHAR(20)" },
        Column { name: "sale_type", sql_type: "INTEGER" },
        Column { name: "price_0", sql_type: "VARCHAR(100)" },
        Column { name: "price_1", sql_type: "VARCHAR(100)" },
        Column { name: "price_2", sql_type: "VARCHAR(100)" },
        Column { name: "price_3", sql_type: "VARCHAR(100)" },
        Column { name: "price_4", sql_type: "VARCHAR(100)" },
        Column { name: "price_5", sql_type: "VARCHAR(100)" },
        Column { name: "price_6", sql_type: "VARCHAR(100)" },
        Column { name: "price_7", sql_type: "VARCHAR(100)" },
        Column { name: "price_8", sql_type: "VARCHAR(100)" },
        Column { name: "price_9", sql_type: "VARCHAR(100)" },
        Column { name: "tax_type", sql_type: "INTEGER" },
        Column { name: "price_currency", sql_type: "INTEGER" },
        Column { name: "currency_code", sql_type: "VARCHAR(20)" },
    ],
    key: &["ic_code", "unit_code", "sale_type"],
};

/// Ten price-level formulas for one product unit and sale type.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceFormulaRecord {
    pub row_ref: i64,
    pub ic_code: String,
    pub unit_code: String,
    pub sale_type: i64,
    /// Formula text for price levels 0 through 9.
    pub prices: [String; 10],
    pub tax_type: i64,
    pub price_currency: i64,
    pub currency_code: String,
}

impl SyncRecord for PriceFormulaRecord {
    const TABLE: &'static TableSpec = &PRICE_FORMULA_TABLE;
    const SOURCE_SELECT: &'static str = "SELECT roworder, ic_code, COALESCE(unit_code, ''), \
        COALESCE(sale_type, 0), COALESCE(price_0, '0'), COALESCE(price_1, '0'), \
        COALESCE(price_2, '0'), COALESCE(price_3, '0'), COALESCE(price_4, '0'), \
        COALESCE(price_5, '0'), COALESCE(price_6, '0'), COALESCE(price_7, '0'), \
        COALESCE(price_8, '0'), COALESCE(price_9, '0'), COALESCE(tax_type, 0), \
        COALESCE(price_currency, 0), COALESCE(currency_code, '') \
        FROM ic_inventory_price_formula";

    fn from_source(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let mut prices: [String; 10] = Default::default();
        for (i, price) in prices.iter_mut().enumerate() {
            *price = row.get(4 + i)?;
        }
        Ok(Self {
            row_ref: row.get(0)?,
            ic_code: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            unit_code: row.get(2)?,
            sale_type: row.get(3)?,
            prices,
            tax_type: row.get(14)?,
            price_currency: row.get(15)?,
            currency_code: row.get(16)?,
        })
    }

    fn from_remote(row: &RemoteRow) -> Result<Self, GatewayError> {
        let mut prices: [String; 10] = Default::default();
        for (i, price) in prices.iter_mut().enumerate() {
            *price = remote_text(row, &format!("price_{i}"))?;
        }
        Ok(Self {
            row_ref: remote_int(row, "row_order_ref")?,
            ic_code: remote_text(row, "ic_code")?,
            unit_code: remote_text(row, "unit_code")?,
            sale_type: remote_int(row, "sale_type")?,
            prices,
            tax_type: remote_int(row, "tax_type")?,
            price_currency: remote_int(row, "price_currency")?,
            currency_code: remote_text(row, "currency_code")?,
        })
    }

    fn validate(&self) -> Result<(), String> {
        require("ic_code", &self.ic_code)
    }

    fn values(&self) -> Vec<SqlValue> {
        let mut values: Vec<SqlValue> = Vec::with_capacity(PRICE_FORMULA_TABLE.columns.len());
        values.push(self.row_ref.into());
        values.push(self.ic_code.as_str().into());
        values.push(self.unit_code.as_str().into());
        values.push(self.sale_type.into());
        values.extend(self.prices.iter().map(|p| SqlValue::from(p.as_str())));
        values.push(self.tax_type.into());
        values.push(self.price_currency.into());
        values.push(self.currency_code.as_str().into());
        values
    }
}

// ---------------------------------------------------------------------------
// Balance
// ---------------------------------------------------------------------------

const BALANCE_TABLE: TableSpec = TableSpec {
    name: "ic_balance",
    columns: &[
        Column { name: "ic_code", sql_type: "VARCHAR(50)" },
        Column { name: "wh_code", sql_type: "VARCHAR(50)" },
        Column { name: "unit_code", sql_type: "VARCHAR(20)" },
        Column { name: "balance_qty", sql_type: "NUMERIC(18,3)" },
    ],
    key: &["ic_code", "wh_code", "unit_code"],
};

/// Stock on hand per product, warehouse and unit. Has no change-log
/// coverage and is only synchronized by full comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceRecord {
    pub ic_code: String,
    pub warehouse: String,
    pub unit_code: String,
    pub balance_qty: f64,
}

impl SyncRecord for BalanceRecord {
    const TABLE: &'static TableSpec = &BALANCE_TABLE;
    const SOURCE_SELECT: &'static str =
        "SELECT ic_code, warehouse, ic_unit_code, balance_qty FROM ic_balance";
    const SOURCE_FILTER: Option<&'static str> = Some(
        "ic_code IS NOT NULL AND ic_code <> '' AND warehouse IS NOT NULL AND warehouse <> '' \
         AND ic_unit_code IS NOT NULL AND ic_unit_code <> ''",
    );

    fn from_source(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            ic_code: row.get(0)?,
            warehouse: row.get(1)?,
            unit_code: row.get(2)?,
            balance_qty: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
        })
    }

    fn from_remote(row: &RemoteRow) -> Result<Self, GatewayError> {
        Ok(Self {
            ic_code: remote_text(row, "ic_code")?,
            warehouse: remote_text(row, "wh_code")?,
            unit_code: remote_text(row, "unit_code")?,
            balance_qty: remote_real(row, "balance_qty")?,
        })
    }

    fn validate(&self) -> Result<(), String> {
        require("ic_code", &self.ic_code)?;
        require("warehouse", &self.warehouse)?;
        require("unit_code", &self.unit_code)
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.ic_code.as_str().into(),
            self.warehouse.as_str().into(),
            self.unit_code.as_str().into(),
            self.balance_qty.into(),
        ]
    }
}

// ---------------------------------------------------------------------------
// Tagged snapshot
// ---------------------------------------------------------------------------

/// Current source state of one change-log row, tagged by entity kind.
#[derive(Debug, Clone, PartialEq)]
pub enum EntitySnapshot {
    Price(PriceRecord),
    Inventory(InventoryRecord),
    ProductBarcode(BarcodeRecord),
    Customer(CustomerRecord),
    PriceFormula(PriceFormulaRecord),
}

impl EntitySnapshot {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Price(_) => EntityKind::Price,
            Self::Inventory(_) => EntityKind::Inventory,
            Self::ProductBarcode(_) => EntityKind::ProductBarcode,
            Self::Customer(_) => EntityKind::Customer,
            Self::PriceFormula(_) => EntityKind::PriceFormula,
        }
    }

    pub fn values(&self) -> Vec<SqlValue> {
        match self {
            Self::Price(r) => r.values(),
            Self::Inventory(r) => r.values(),
            Self::ProductBarcode(r) => r.values(),
            Self::Customer(r) => r.values(),
            Self::PriceFormula(r) => r.values(),
        }
    }

    pub fn row_ref(&self) -> i64 {
        match self {
            Self::Price(r) => r.row_ref,
            Self::Inventory(r) => r.row_ref,
            Self::ProductBarcode(r) => r.row_ref,
            Self::Customer(r) => r.row_ref,
            Self::PriceFormula(r) => r.row_ref,
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        match self {
            Self::Price(r) => r.natural_key(),
            Self::Inventory(r) => r.natural_key(),
            Self::ProductBarcode(r) => r.natural_key(),
            Self::Customer(r) => r.natural_key(),
            Self::PriceFormula(r) => r.natural_key(),
        }
    }
}

impl ChangeLogged for PriceRecord {
    const KIND: EntityKind = EntityKind::Price;
    const SOURCE_ROW_REF: &'static str = "roworder";

    fn row_ref(&self) -> i64 {
        self.row_ref
    }

    fn into_snapshot(self) -> EntitySnapshot {
        EntitySnapshot::Price(self)
    }
}

impl ChangeLogged for InventoryRecord {
    const KIND: EntityKind = EntityKind::Inventory;
    const SOURCE_ROW_REF: &'static str = "roworder";

    fn row_ref(&self) -> i64 {
        self.row_ref
    }

    fn into_snapshot(self) -> EntitySnapshot {
        EntitySnapshot::Inventory(self)
    }
}

impl ChangeLogged for BarcodeRecord {
    const KIND: EntityKind = EntityKind::ProductBarcode;
    const SOURCE_ROW_REF: &'static str = "b.roworder";

    fn row_ref(&self) -> i64 {
        self.row_ref
    }

    fn into_snapshot(self) -> EntitySnapshot {
        EntitySnapshot::ProductBarcode(self)
    }
}

impl ChangeLogged for CustomerRecord {
    const KIND: EntityKind = EntityKind::Customer;
    const SOURCE_ROW_REF: &'static str = "roworder";

    fn row_ref(&self) -> i64 {
        self.row_ref
    }

    fn into_snapshot(self) -> EntitySnapshot {
        EntitySnapshot::Customer(self)
    }
}

impl ChangeLogged for PriceFormulaRecord {
    const KIND: EntityKind = EntityKind::PriceFormula;
    const SOURCE_ROW_REF: &'static str = "roworder";

    fn row_ref(&self) -> i64 {
        self.row_ref
    }

    fn into_snapshot(self) -> EntitySnapshot {
        EntitySnapshot::PriceFormula(self)
    }
}

/// Remote table for a change-log kind.
pub fn table_for(kind: EntityKind) -> &'static TableSpec {
    match kind {
        EntityKind::Price => PriceRecord::TABLE,
        EntityKind::Inventory => InventoryRecord::TABLE,
        EntityKind::ProductBarcode => BarcodeRecord::TABLE,
        EntityKind::Customer => CustomerRecord::TABLE,
        EntityKind::PriceFormula => PriceFormulaRecord::TABLE,
    }
}
