//! Database Adapter Layer
//!
//! Provides a trait-based abstraction over relational drivers.
//! SQLite ships with the crate; other backends plug in through
//! [`SqlDriver`] and reuse the dialect generator for their SQL.

pub mod dialect;
pub mod sqlite;

pub use dialect::{ColumnDef, ColumnType, DialectGenerator, SqlDialect};
pub use sqlite::SqliteDriver;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::error::Result;

/// A result row keyed by column name
pub type Row = serde_json::Map<String, Value>;

/// Connection source for one relational backend
pub trait SqlDriver: Send + Sync {
    /// Which SQL dialect this driver speaks
    fn dialect(&self) -> SqlDialect;

    /// Check out a connection; it goes back to the driver when dropped
    fn acquire(&self) -> Result<Box<dyn SqlConn>>;

    /// Release pooled resources. Calling it again is a no-op.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Test the connection is alive
    fn test_connection(&self) -> Result<()> {
        self.acquire()?.query("SELECT 1", &[]).map(|_| ())
    }
}

/// A single checked-out connection
pub trait SqlConn: Send {
    /// Execute a query that returns rows (SELECT, PRAGMA, etc.)
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Execute a statement that modifies data (INSERT, UPDATE, DELETE, CREATE, etc.)
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<ExecResult>;

    /// Execute one or more statements without parameters
    fn execute_batch(&mut self, sql: &str) -> Result<()>;
}

/// SQL value for parameterized queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Bind a JSON value. Arrays and objects are stored as JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Integer(i)
                } else if let Some(u) = n.as_u64() {
                    // Beyond i64 range; keep the digits rather than lose precision
                    SqlValue::Text(u.to_string())
                } else {
                    SqlValue::Real(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Integer(i)
    }
}

impl From<u32> for SqlValue {
    fn from(i: u32) -> Self {
        SqlValue::Integer(i64::from(i))
    }
}

impl From<f64> for SqlValue {
    fn from(f: f64) -> Self {
        SqlValue::Real(f)
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        SqlValue::Bool(b)
    }
}

/// Result from an INSERT/UPDATE/DELETE-type statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub affected_rows: u64,
    /// Row id generated by the last insert on this connection, if the
    /// driver reports one
    pub last_insert_id: Option<i64>,
    pub execution_time_ms: u64,
}
