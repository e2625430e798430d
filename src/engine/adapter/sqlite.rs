//! SQLite Driver
//!
//! Implements SqlDriver for SQLite using rusqlite + r2d2 connection pooling.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params_from_iter;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Instant;

use super::dialect::SqlDialect;
use super::{ExecResult, Row, SqlConn, SqlDriver, SqlValue};
use crate::engine::error::{DbError, Result};

type DbPool = Pool<SqliteConnectionManager>;
type DbConn = PooledConnection<SqliteConnectionManager>;

const MEMORY_PATH: &str = ":memory:";

pub struct SqliteDriver {
    pool: RwLock<Option<DbPool>>,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl SqliteDriver {
    /// Open a file database, or an in-memory one for `:memory:`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if db_path.as_os_str() == MEMORY_PATH {
            return Self::in_memory();
        }

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DbError::Connection(format!(
                        "Failed to create database directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_init(|c| c.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;"));
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let driver = Self {
            pool: RwLock::new(Some(pool)),
            db_path: db_path.to_path_buf(),
        };
        driver.init_journal()?;
        Ok(driver)
    }

    /// Every connection to `:memory:` is its own database, so the pool
    /// holds exactly one.
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|c| c.execute_batch("PRAGMA foreign_keys=ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        Ok(Self {
            pool: RwLock::new(Some(pool)),
            db_path: PathBuf::from(MEMORY_PATH),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn init_journal(&self) -> Result<()> {
        let conn = self.get_conn()?;
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        Ok(())
    }

    fn get_conn(&self) -> Result<DbConn> {
        let guard = self
            .pool
            .read()
            .map_err(|_| DbError::Connection("connection pool lock poisoned".to_string()))?;
        match guard.as_ref() {
            Some(pool) => Ok(pool.get()?),
            None => Err(DbError::Closed),
        }
    }

    /// Convert a rusqlite ValueRef to serde_json Value
    fn value_ref_to_json(val: ValueRef<'_>) -> Value {
        match val {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => json!(i),
            ValueRef::Real(f) => json!(f),
            ValueRef::Text(t) => json!(String::from_utf8_lossy(t).to_string()),
            ValueRef::Blob(b) => json!(b),
        }
    }
}

impl SqlDriver for SqliteDriver {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    fn acquire(&self) -> Result<Box<dyn SqlConn>> {
        Ok(Box::new(SqliteConn(self.get_conn()?)))
    }

    fn close(&self) {
        if let Ok(mut guard) = self.pool.write() {
            if guard.take().is_some() {
                tracing::debug!(path = %self.db_path.display(), "sqlite pool closed");
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.pool.read().map(|g| g.is_none()).unwrap_or(true)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            SqlValue::Integer(i) => ToSqlOutput::from(*i),
            SqlValue::Real(f) => ToSqlOutput::from(*f),
            SqlValue::Text(s) => ToSqlOutput::from(s.as_str()),
            SqlValue::Bool(b) => ToSqlOutput::from(*b),
            SqlValue::Blob(b) => ToSqlOutput::from(b.as_slice()),
        })
    }
}

/// A pooled SQLite connection
struct SqliteConn(DbConn);

impl SqlConn for SqliteConn {
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let mut stmt = self.0.prepare(sql)?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut map = Row::new();
            for (i, name) in column_names.iter().enumerate() {
                map.insert(name.clone(), SqliteDriver::value_ref_to_json(row.get_ref(i)?));
            }
            out.push(map);
        }
        Ok(out)
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<ExecResult> {
        let start = Instant::now();
        let affected = self.0.execute(sql, params_from_iter(params.iter()))?;
        let last_id = self.0.last_insert_rowid();

        Ok(ExecResult {
            affected_rows: affected as u64,
            last_insert_id: if last_id == 0 { None } else { Some(last_id) },
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.0.execute_batch(sql)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_in_memory_roundtrip() {
        let driver = SqliteDriver::in_memory().unwrap();
        let mut conn = driver.acquire().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, raw BLOB)")
            .unwrap();

        let res = conn
            .execute(
                "INSERT INTO t (name, raw) VALUES (?1, ?2)",
                &[SqlValue::from("alpha"), SqlValue::Blob(vec![1, 2])],
            )
            .unwrap();
        assert_eq!(res.affected_rows, 1);
        assert_eq!(res.last_insert_id, Some(1));

        let rows = conn.query("SELECT * FROM t WHERE name = ?1", &["alpha".into()]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[0]["name"], json!("alpha"));
        assert_eq!(rows[0]["raw"], json!([1, 2]));
    }

    #[test]
    fn test_file_database_uses_wal() {
        let dir = tempdir().unwrap();
        let driver = SqliteDriver::open(&dir.path().join("nested").join("app.db")).unwrap();
        let mut conn = driver.acquire().unwrap();
        let rows = conn.query("PRAGMA journal_mode", &[]).unwrap();
        assert_eq!(rows[0]["journal_mode"], json!("wal"));
        driver.test_connection().unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let driver = SqliteDriver::in_memory().unwrap();
        assert!(!driver.is_closed());
        driver.close();
        driver.close();
        assert!(driver.is_closed());
        assert!(matches!(driver.acquire(), Err(DbError::Closed)));
    }

    #[test]
    fn test_driver_errors_pass_through() {
        let driver = SqliteDriver::in_memory().unwrap();
        let mut conn = driver.acquire().unwrap();
        let err = conn.execute("INSERT INTO missing VALUES (1)", &[]).unwrap_err();
        assert!(matches!(err, DbError::Sqlite(_)));
    }
}
