//! Relational Session
//!
//! [`Database`] binds a driver, its dialect and a table prefix together and
//! runs the generic record operations. `begin` derives a transactional
//! `Database` pinned to one connection; `commit` or `rollback` ends it.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex};

use super::adapter::{DialectGenerator, ExecResult, Row, SqlConn, SqlDialect, SqlDriver, SqlValue};
use super::error::{DbError, Result};
use super::migrations::{self, MigrationReport};
use super::query::{Filter, FindOptions, OrderBy};
use super::record::{self, id_from_i64, prefixed_name, Record, ID_COLUMN};

/// Target for per-statement logs
const SQL_LOG_TARGET: &str = "recordkit::sql";

#[derive(Clone)]
pub struct Database {
    prefix: String,
    gen: DialectGenerator,
    debug: bool,
    handle: Handle,
}

#[derive(Clone)]
enum Handle {
    Pool(Arc<dyn SqlDriver>),
    Tx(Arc<Mutex<TxState>>),
}

/// The connection of an open transaction; `None` once it has ended
struct TxState {
    conn: Option<Box<dyn SqlConn>>,
    gen: DialectGenerator,
}

impl Drop for TxState {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            tracing::warn!("transaction dropped without commit or rollback, rolling back");
            if let Err(e) = conn.execute_batch(self.gen.rollback()) {
                tracing::error!(error = %e, "rollback of abandoned transaction failed");
            }
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dialect", &self.gen.dialect)
            .field("prefix", &self.prefix)
            .field("transaction", &self.is_transaction())
            .finish_non_exhaustive()
    }
}

impl Database {
    pub(crate) fn new(driver: Arc<dyn SqlDriver>, prefix: &str, debug: bool) -> Self {
        Self {
            prefix: prefix.to_string(),
            gen: DialectGenerator::new(driver.dialect()),
            debug,
            handle: Handle::Pool(driver),
        }
    }

    /// The underlying driver, or `None` on a transactional handle
    pub fn driver(&self) -> Option<Arc<dyn SqlDriver>> {
        match &self.handle {
            Handle::Pool(driver) => Some(Arc::clone(driver)),
            Handle::Tx(_) => None,
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.gen.dialect
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Log every statement at info level instead of trace
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn is_transaction(&self) -> bool {
        matches!(self.handle, Handle::Tx(_))
    }

    pub fn table_name(&self, base: &str) -> String {
        prefixed_name(&self.prefix, base)
    }

    pub fn table_name_of<T: Record>(&self) -> String {
        self.table_name(T::TABLE)
    }

    /// Create the record's table, or add the columns it is missing
    pub fn auto_migrate<T: Record>(&self) -> Result<MigrationReport> {
        migrations::auto_migrate(self, &self.table_name_of::<T>(), &T::columns()?)
    }

    /// Insert a record. A zero id is assigned by the database and written
    /// back into the record.
    pub fn create<T: Record>(&self, record: &mut T) -> Result<u32> {
        let table = self.table_name_of::<T>();
        let mut fields = record::to_fields(record)?;
        if record.id() == 0 {
            fields.remove(ID_COLUMN);
        }

        let columns: Vec<&str> = fields.keys().map(String::as_str).collect();
        let params: Vec<SqlValue> = fields.values().map(SqlValue::from_json).collect();
        let sql = self.gen.insert(&table, &columns)?;
        let res = self.execute(&sql, &params)?;

        let id = if record.id() != 0 {
            record.id()
        } else {
            let raw = res.last_insert_id.ok_or_else(|| {
                DbError::InvalidData(format!("driver reported no id for insert into {}", table))
            })?;
            id_from_i64(raw)?
        };
        record.set_id(id);
        Ok(id)
    }

    /// Load the first record (by primary key) equal to the non-zero fields
    /// of `record`, overwriting it in place.
    pub fn find<T: Record>(&self, record: &mut T) -> Result<()> {
        let table = self.table_name_of::<T>();
        let columns = T::columns()?;
        let filter = Filter::from_template(record)?;
        let order: Vec<OrderBy> = columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| OrderBy::asc(&c.name))
            .collect();

        let (sql, params) = self.gen.select(&table, &filter, &order, Some(1), 0)?;
        let row = self
            .query(&sql, &params)?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound(table.clone()))?;
        *record = record::decode_row(row, &columns)?;
        Ok(())
    }

    pub fn find_all<T: Record>(&self) -> Result<Vec<T>> {
        self.find_many(&FindOptions::default())
    }

    /// Load every record matching `opts`, in cursor order
    pub fn find_many<T: Record>(&self, opts: &FindOptions) -> Result<Vec<T>> {
        let table = self.table_name_of::<T>();
        let columns = T::columns()?;
        let (sql, params) = self
            .gen
            .select(&table, &opts.filter, &opts.order_by, opts.limit, opts.skip)?;

        let rows = self.query(&sql, &params)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(record::decode_row(row, &columns)?);
        }
        Ok(out)
    }

    /// Loosely-typed find: `limit` of 0 means unlimited, an empty
    /// `order_by` means unsorted, and `where_and_args` alternates column
    /// names and values. An odd-length argument list is ignored and the
    /// query runs unfiltered.
    pub fn find_many_args<T: Record>(
        &self,
        limit: u32,
        order_by: &str,
        where_and_args: &[Value],
    ) -> Result<Vec<T>> {
        let mut opts = FindOptions::new()
            .filter(Filter::from_pairs_lenient(where_and_args)?)
            .sort(order_by)?;
        if limit > 0 {
            opts = opts.limit(limit);
        }
        self.find_many(&opts)
    }

    /// Run a statement that returns no rows
    pub fn exec_sql(&self, sql: &str, params: &[SqlValue]) -> Result<ExecResult> {
        self.execute(sql, params)
    }

    /// Run a query and decode each row into `R`
    pub fn exec_sql_with_result<R: DeserializeOwned>(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<R>> {
        self.query(sql, params)?
            .into_iter()
            .map(|row| serde_json::from_value(Value::Object(row)).map_err(DbError::from))
            .collect()
    }

    /// Write the record's fields to its row. With an empty `columns` every
    /// non-id field is written; otherwise only the named ones.
    pub fn sync<T: Record>(&self, record: &T, columns: &[&str]) -> Result<u64> {
        let table = self.table_name_of::<T>();
        if record.id() == 0 {
            return Err(DbError::MissingId(table));
        }

        let mut fields = record::to_fields(record)?;
        fields.remove(ID_COLUMN);

        let selected: Vec<(String, Value)> = if columns.is_empty() {
            fields.into_iter().collect()
        } else {
            columns
                .iter()
                .map(|c| {
                    fields
                        .remove(*c)
                        .map(|v| (c.to_string(), v))
                        .ok_or_else(|| DbError::InvalidArgument(format!("unknown column {} for {}", c, table)))
                })
                .collect::<Result<_>>()?
        };
        if selected.is_empty() {
            return Ok(0);
        }

        let names: Vec<&str> = selected.iter().map(|(n, _)| n.as_str()).collect();
        let mut params: Vec<SqlValue> = selected.iter().map(|(_, v)| SqlValue::from_json(v)).collect();
        params.push(SqlValue::from(record.id()));

        let sql = self.gen.update_by_key(&table, &names, ID_COLUMN)?;
        Ok(self.execute(&sql, &params)?.affected_rows)
    }

    /// Delete the record's row; the record must carry an id
    pub fn delete<T: Record>(&self, record: &T) -> Result<u64> {
        let table = self.table_name_of::<T>();
        if record.id() == 0 {
            return Err(DbError::MissingId(table));
        }
        let (sql, params) = self
            .gen
            .delete(&table, &Filter::new().eq(ID_COLUMN, record.id()))?;
        Ok(self.execute(&sql, &params)?.affected_rows)
    }

    /// Delete every row of `T`'s table matching a non-empty filter
    pub fn delete_where<T: Record>(&self, filter: &Filter) -> Result<u64> {
        let table = self.table_name_of::<T>();
        if filter.is_empty() {
            return Err(DbError::InvalidArgument(format!(
                "refusing to delete from {} without a filter",
                table
            )));
        }
        let (sql, params) = self.gen.delete(&table, filter)?;
        Ok(self.execute(&sql, &params)?.affected_rows)
    }

    /// Start a transaction on a dedicated connection
    pub fn begin(&self) -> Result<Database> {
        let driver = match &self.handle {
            Handle::Pool(driver) => driver,
            Handle::Tx(_) => {
                return Err(DbError::Transaction("nested transactions are not supported".to_string()))
            }
        };

        let mut conn = driver.acquire()?;
        self.log_statement(self.gen.begin(), &[]);
        conn.execute_batch(self.gen.begin())?;
        tracing::debug!(dialect = %self.gen.dialect, "transaction started");

        Ok(Database {
            prefix: self.prefix.clone(),
            gen: self.gen,
            debug: self.debug,
            handle: Handle::Tx(Arc::new(Mutex::new(TxState {
                conn: Some(conn),
                gen: self.gen,
            }))),
        })
    }

    pub fn commit(&self) -> Result<()> {
        self.finish(true)
    }

    pub fn rollback(&self) -> Result<()> {
        self.finish(false)
    }

    fn finish(&self, commit: bool) -> Result<()> {
        let Handle::Tx(tx) = &self.handle else {
            return Err(DbError::Transaction("no transaction in progress".to_string()));
        };
        let mut state = tx
            .lock()
            .map_err(|_| DbError::Transaction("transaction lock poisoned".to_string()))?;
        let mut conn = state
            .conn
            .take()
            .ok_or_else(|| DbError::Transaction("transaction already finished".to_string()))?;

        let sql = if commit { self.gen.commit() } else { self.gen.rollback() };
        self.log_statement(sql, &[]);
        if let Err(e) = conn.execute_batch(sql) {
            if commit {
                // Never hand a connection with an open transaction back to the pool
                if let Err(rb) = conn.execute_batch(self.gen.rollback()) {
                    tracing::error!(error = %rb, "rollback after failed commit failed");
                }
            }
            return Err(e);
        }
        tracing::debug!(committed = commit, "transaction finished");
        Ok(())
    }

    /// Close the session. Rolls back an unfinished transaction; closing
    /// twice is a no-op.
    pub fn close(&self) -> Result<()> {
        match &self.handle {
            Handle::Pool(driver) => {
                driver.close();
                Ok(())
            }
            Handle::Tx(tx) => {
                let open = tx.lock().map(|s| s.conn.is_some()).unwrap_or(false);
                if open {
                    self.rollback()
                } else {
                    Ok(())
                }
            }
        }
    }

    pub(crate) fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        self.log_statement(sql, params);
        self.with_conn(|conn| conn.query(sql, params))
    }

    pub(crate) fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<ExecResult> {
        self.log_statement(sql, params);
        self.with_conn(|conn| conn.execute(sql, params))
    }

    fn with_conn<R>(&self, f: impl FnOnce(&mut dyn SqlConn) -> Result<R>) -> Result<R> {
        match &self.handle {
            Handle::Pool(driver) => {
                let mut conn = driver.acquire()?;
                f(conn.as_mut())
            }
            Handle::Tx(tx) => {
                let mut state = tx
                    .lock()
                    .map_err(|_| DbError::Transaction("transaction lock poisoned".to_string()))?;
                match state.conn.as_mut() {
                    Some(conn) => f(conn.as_mut()),
                    None => Err(DbError::Transaction("transaction already finished".to_string())),
                }
            }
        }
    }

    fn log_statement(&self, sql: &str, params: &[SqlValue]) {
        if self.debug {
            tracing::info!(target: SQL_LOG_TARGET, sql, ?params, "executing");
        } else {
            tracing::trace!(target: SQL_LOG_TARGET, sql, ?params, "executing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::adapter::SqliteDriver;
    use crate::engine::record::Model;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        #[serde(flatten)]
        model: Model,
        title: String,
        pinned: bool,
    }

    impl Record for Note {
        const TABLE: &'static str = "notes";

        fn id(&self) -> u32 {
            self.model.id
        }

        fn set_id(&mut self, id: u32) {
            self.model.id = id;
        }
    }

    fn note(title: &str) -> Note {
        Note { title: title.to_string(), ..Default::default() }
    }

    fn memory_db(prefix: &str) -> Database {
        let db = Database::new(Arc::new(SqliteDriver::in_memory().unwrap()), prefix, false);
        db.auto_migrate::<Note>().unwrap();
        db
    }

    #[test]
    fn test_create_assigns_ids() {
        let db = memory_db("t");
        let mut a = note("a");
        let mut b = note("b");
        assert_eq!(db.create(&mut a).unwrap(), 1);
        assert_eq!(db.create(&mut b).unwrap(), 2);
        assert_eq!(b.id(), 2);

        let mut explicit = Note { model: Model::new(40), ..note("c") };
        assert_eq!(db.create(&mut explicit).unwrap(), 40);
    }

    #[test]
    fn test_find_by_template() {
        let db = memory_db("t");
        let mut a = Note { pinned: true, ..note("a") };
        db.create(&mut a).unwrap();
        db.create(&mut note("b")).unwrap();

        let mut probe = note("b");
        db.find(&mut probe).unwrap();
        assert_eq!(probe.id(), 2);
        assert!(!probe.pinned);

        let mut probe = Note { model: Model::new(1), ..Default::default() };
        db.find(&mut probe).unwrap();
        assert_eq!(probe, a);

        let mut missing = note("zzz");
        assert!(db.find(&mut missing).unwrap_err().is_not_found());
    }

    #[test]
    fn test_find_many_options() {
        let db = memory_db("");
        for t in ["c", "a", "b"] {
            db.create(&mut note(t)).unwrap();
        }

        let sorted: Vec<Note> = db.find_many(&FindOptions::new().sort("title desc").unwrap().limit(2)).unwrap();
        let titles: Vec<&str> = sorted.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["c", "b"]);

        let paged: Vec<Note> = db
            .find_many(&FindOptions::new().order_by(OrderBy::asc("id")).skip(1))
            .unwrap();
        assert_eq!(paged.len(), 2);
        assert_eq!(paged[0].title, "a");
    }

    #[test]
    fn test_sync_rejects_unknown_column_and_missing_id() {
        let db = memory_db("t");
        let mut a = note("a");
        assert!(matches!(db.sync(&a, &[]), Err(DbError::MissingId(_))));
        assert!(matches!(db.delete(&a), Err(DbError::MissingId(_))));

        db.create(&mut a).unwrap();
        assert!(matches!(db.sync(&a, &["colour"]), Err(DbError::InvalidArgument(_))));
        assert!(matches!(
            db.delete_where::<Note>(&Filter::new()),
            Err(DbError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_raw_sql() {
        #[derive(Deserialize)]
        struct Count {
            n: i64,
        }

        let db = memory_db("t");
        db.create(&mut note("a")).unwrap();
        let res = db
            .exec_sql("UPDATE t_notes SET title = ?1", &[SqlValue::from("z")])
            .unwrap();
        assert_eq!(res.affected_rows, 1);

        let counts: Vec<Count> = db
            .exec_sql_with_result("SELECT COUNT(*) AS n FROM t_notes WHERE title = ?1", &["z".into()])
            .unwrap();
        assert_eq!(counts[0].n, 1);
    }

    #[test]
    fn test_transaction_state_machine() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(SqliteDriver::open(&dir.path().join("tx.db")).unwrap());
        let db = Database::new(driver, "t", true);
        db.auto_migrate::<Note>().unwrap();

        assert!(matches!(db.commit(), Err(DbError::Transaction(_))));

        let tx = db.begin().unwrap();
        assert!(tx.is_transaction());
        assert!(tx.driver().is_none());
        assert!(matches!(tx.begin(), Err(DbError::Transaction(_))));

        tx.create(&mut note("inside")).unwrap();
        tx.commit().unwrap();
        assert!(matches!(tx.rollback(), Err(DbError::Transaction(_))));
        assert!(matches!(tx.find_all::<Note>(), Err(DbError::Transaction(_))));

        assert_eq!(db.find_all::<Note>().unwrap().len(), 1);
    }

    #[test]
    fn test_close_twice() {
        let db = memory_db("t");
        db.close().unwrap();
        db.close().unwrap();
        assert!(matches!(db.find_all::<Note>(), Err(DbError::Closed)));
    }

    /// Connection whose COMMIT always fails; records every batch it runs
    struct FlakyConn {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl SqlConn for FlakyConn {
        fn query(&mut self, _sql: &str, _params: &[SqlValue]) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }

        fn execute(&mut self, _sql: &str, _params: &[SqlValue]) -> Result<ExecResult> {
            Ok(ExecResult { affected_rows: 0, last_insert_id: None, execution_time_ms: 0 })
        }

        fn execute_batch(&mut self, sql: &str) -> Result<()> {
            self.log.lock().unwrap().push(sql.to_string());
            match sql {
                "COMMIT" | "ROLLBACK" => Err(DbError::Connection("server went away".to_string())),
                _ => Ok(()),
            }
        }
    }

    struct FlakyDriver {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl SqlDriver for FlakyDriver {
        fn dialect(&self) -> SqlDialect {
            SqlDialect::Postgres
        }

        fn acquire(&self) -> Result<Box<dyn SqlConn>> {
            Ok(Box::new(FlakyConn { log: Arc::clone(&self.log) }))
        }

        fn close(&self) {}

        fn is_closed(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_failed_commit_rolls_back_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let db = Database::new(Arc::new(FlakyDriver { log: Arc::clone(&log) }), "", false);

        let tx = db.begin().unwrap();
        assert!(matches!(tx.commit(), Err(DbError::Connection(_))));
        assert!(matches!(tx.rollback(), Err(DbError::Transaction(_))));
        drop(tx);

        assert_eq!(*log.lock().unwrap(), vec!["BEGIN", "COMMIT", "ROLLBACK"]);
    }
}
