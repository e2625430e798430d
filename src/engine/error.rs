//! Error Types
//!
//! Every facade operation returns [`DbError`]. Driver errors are carried
//! through unchanged so callers can match on the backend's own error.

use thiserror::Error;

use super::nosql::NoSqlError;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Record not found in {0}")]
    NotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Document store error: {0}")]
    NoSql(#[from] NoSqlError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Record in {0} has no id")]
    MissingId(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Connection is closed")]
    Closed,

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl DbError {
    /// True for the "no matching record" outcome of single-record queries.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
