//! Embedded Store Error Types

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NoSqlError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Document not found: {collection}/{id}")]
    DocumentNotFound { collection: String, id: u32 },

    #[error("Invalid collection name: {0}")]
    InvalidCollectionName(String),

    #[error("Invalid database name: {0}")]
    InvalidDatabaseName(String),

    #[error("Document ID already exists: {collection}/{id}")]
    DuplicateId { collection: String, id: u32 },

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Store is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, NoSqlError>;
