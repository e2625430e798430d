//! Dial-later relational handle
//!
//! [`SqlDb`] is created empty and connected with `dial` or `dial_sqlite`.
//! Touching the session before a successful dial is a programming error
//! and panics. Model-level writes (`sync`, `del`) and their
//! in-transaction forms live here and on [`Transaction`].

use serde_json::Value;

use super::adapter::{ExecResult, SqlDialect, SqlValue};
use super::connections;
use super::config::ConnectParams;
use super::database::Database;
use super::error::Result;
use super::migrations::MigrationReport;
use super::query::FindOptions;
use super::record::Record;

#[derive(Debug, Default)]
pub struct SqlDb {
    db: Option<Database>,
}

impl SqlDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to a database server. Redialing replaces the session.
    #[allow(clippy::too_many_arguments)]
    pub fn dial(
        &mut self,
        dialect: SqlDialect,
        host: &str,
        port: u16,
        user: &str,
        pwd: &str,
        default_db: &str,
        prefix: &str,
        debug: bool,
    ) -> Result<()> {
        let params = ConnectParams::new(dialect, default_db)
            .with_server(host, port)
            .with_credentials(user, pwd)
            .with_prefix(prefix)
            .with_debug(debug);
        self.db = Some(connections::connect(&params)?);
        Ok(())
    }

    /// `path` is a file path or `:memory:`
    pub fn dial_sqlite(&mut self, path: &str, prefix: &str, debug: bool) -> Result<()> {
        self.db = Some(connections::connect_sqlite(path, prefix, debug)?);
        Ok(())
    }

    pub fn is_dialed(&self) -> bool {
        self.db.is_some()
    }

    /// The connected session.
    ///
    /// # Panics
    ///
    /// If neither `dial` nor `dial_sqlite` has succeeded.
    pub fn db(&self) -> &Database {
        match &self.db {
            Some(db) => db,
            None => panic!("SqlDb used before dial; call dial or dial_sqlite first"),
        }
    }

    pub fn table_name(&self, base: &str) -> String {
        self.db().table_name(base)
    }

    pub fn auto_migrate<T: Record>(&self) -> Result<MigrationReport> {
        self.db().auto_migrate::<T>()
    }

    pub fn create<T: Record>(&self, record: &mut T) -> Result<u32> {
        self.db().create(record)
    }

    pub fn find<T: Record>(&self, record: &mut T) -> Result<()> {
        self.db().find(record)
    }

    pub fn find_all<T: Record>(&self) -> Result<Vec<T>> {
        self.db().find_all()
    }

    /// See [`Database::find_many_args`]
    pub fn find_many<T: Record>(&self, limit: u32, order_by: &str, where_and_args: &[Value]) -> Result<Vec<T>> {
        self.db().find_many_args(limit, order_by, where_and_args)
    }

    pub fn find_with<T: Record>(&self, opts: &FindOptions) -> Result<Vec<T>> {
        self.db().find_many(opts)
    }

    /// Write a record back; an empty `columns` writes every field
    pub fn sync<T: Record>(&self, record: &T, columns: &[&str]) -> Result<u64> {
        self.db().sync(record, columns)
    }

    /// Delete a record by its id
    pub fn del<T: Record>(&self, record: &T) -> Result<u64> {
        self.db().delete(record)
    }

    pub fn begin(&self) -> Result<Transaction> {
        Ok(Transaction { tx: self.db().begin()? })
    }

    /// Close the session if one is open
    pub fn close(&mut self) -> Result<()> {
        match self.db.take() {
            Some(db) => db.close(),
            None => Ok(()),
        }
    }
}

/// An open transaction from [`SqlDb::begin`]. Dropping it without
/// `commit` rolls back.
#[derive(Debug)]
pub struct Transaction {
    tx: Database,
}

impl Transaction {
    /// The transactional session, for operations not mirrored here
    pub fn database(&self) -> &Database {
        &self.tx
    }

    pub fn create<T: Record>(&self, record: &mut T) -> Result<u32> {
        self.tx.create(record)
    }

    pub fn sync_in_tx<T: Record>(&self, record: &T, columns: &[&str]) -> Result<u64> {
        self.tx.sync(record, columns)
    }

    pub fn del_in_tx<T: Record>(&self, record: &T) -> Result<u64> {
        self.tx.delete(record)
    }

    pub fn exec(&self, sql: &str, params: &[SqlValue]) -> Result<ExecResult> {
        self.tx.exec_sql(sql, params)
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()
    }

    pub fn rollback(self) -> Result<()> {
        self.tx.rollback()
    }
}
