//! recordkit - generic record mapping over relational and document stores
//!
//! Three facades share the same [`Record`] contract:
//! - [`SqlDb`]: a dial-later relational handle with model-level writes
//! - [`orm::Database`]: a connected relational session with raw SQL and
//!   transactions
//! - [`docdb::DocDatabase`]: a document store session

pub mod engine;

pub use engine::{adapter, config, docdb, error, query, record, sqldb};
pub use engine::{Config, ConnectParams, DbError, DocDatabase, DocumentParams, Result, SqlDb};
pub use engine::query::{CompareOp, Filter, FindOptions, OrderBy, SortDirection};
pub use engine::record::{Model, Record};

/// Connected relational sessions
pub mod orm {
    pub use crate::engine::connections::{
        connect, connect_mssql, connect_mysql, connect_postgres, connect_sqlite, connect_with_driver,
    };
    pub use crate::engine::database::Database;
    pub use crate::engine::migrations::MigrationReport;
}
