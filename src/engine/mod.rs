// recordkit engine - core module structure
pub mod adapter;
pub mod config;
pub mod connections;
pub mod database;
pub mod docdb;
pub mod error;
pub mod migrations;
pub mod nosql;
pub mod query;
pub mod record;
pub mod sqldb;

pub use config::{Config, ConnectParams, DocumentParams};
pub use database::Database;
pub use docdb::DocDatabase;
pub use error::{DbError, Result};
pub use sqldb::SqlDb;
