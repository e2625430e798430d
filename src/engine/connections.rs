//! Connection Manager
//!
//! Opens a driver for a set of connection parameters and wraps it in a
//! [`Database`] session.

use std::path::Path;
use std::sync::Arc;

use super::adapter::{SqlDialect, SqlDriver, SqliteDriver};
use super::config::ConnectParams;
use super::database::Database;
use super::error::{DbError, Result};

/// Open a session for `params`.
pub fn connect(params: &ConnectParams) -> Result<Database> {
    let driver: Arc<dyn SqlDriver> = match params.dialect {
        SqlDialect::Sqlite => Arc::new(SqliteDriver::open(Path::new(&params.database))?),
        other => {
            return Err(DbError::Connection(format!(
                "no driver available for {} ({})",
                other,
                params.redacted_dsn()
            )))
        }
    };
    connect_with_driver(driver, &params.table_prefix, params.debug)
}

/// Wrap an application-supplied driver. The driver is probed once so a
/// dead connection fails here rather than on first use.
pub fn connect_with_driver(driver: Arc<dyn SqlDriver>, prefix: &str, debug: bool) -> Result<Database> {
    driver.test_connection()?;
    tracing::info!(dialect = %driver.dialect(), prefix, "database connected");
    Ok(Database::new(driver, prefix, debug))
}

pub fn connect_mysql(host: &str, port: u16, user: &str, pwd: &str, default_db: &str, prefix: &str, debug: bool) -> Result<Database> {
    connect(&server_params(SqlDialect::Mysql, host, port, user, pwd, default_db, prefix, debug))
}

pub fn connect_mssql(host: &str, port: u16, user: &str, pwd: &str, default_db: &str, prefix: &str, debug: bool) -> Result<Database> {
    connect(&server_params(SqlDialect::Mssql, host, port, user, pwd, default_db, prefix, debug))
}

pub fn connect_postgres(host: &str, port: u16, user: &str, pwd: &str, default_db: &str, prefix: &str, debug: bool) -> Result<Database> {
    connect(&server_params(SqlDialect::Postgres, host, port, user, pwd, default_db, prefix, debug))
}

/// `path` is a file path or `:memory:`
pub fn connect_sqlite(path: &str, prefix: &str, debug: bool) -> Result<Database> {
    connect(&ConnectParams::sqlite(path).with_prefix(prefix).with_debug(debug))
}

#[allow(clippy::too_many_arguments)]
fn server_params(
    dialect: SqlDialect,
    host: &str,
    port: u16,
    user: &str,
    pwd: &str,
    default_db: &str,
    prefix: &str,
    debug: bool,
) -> ConnectParams {
    ConnectParams::new(dialect, default_db)
        .with_server(host, port)
        .with_credentials(user, pwd)
        .with_prefix(prefix)
        .with_debug(debug)
}
