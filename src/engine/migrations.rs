//! Auto-migrate
//! Creates a record's table, or adds the columns an existing table lacks.
//! Columns are never dropped or altered.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

use super::adapter::{ColumnDef, DialectGenerator};
use super::database::Database;
use super::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub table: String,
    /// True if the table did not exist before
    pub created: bool,
    pub added_columns: Vec<String>,
    pub applied_at: DateTime<Utc>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        !self.created && self.added_columns.is_empty()
    }
}

pub(crate) fn auto_migrate(db: &Database, table: &str, columns: &[ColumnDef]) -> Result<MigrationReport> {
    let gen = DialectGenerator::new(db.dialect());
    let existing = existing_columns(db, &gen, table)?;

    let mut report = MigrationReport {
        table: table.to_string(),
        created: existing.is_empty(),
        added_columns: Vec::new(),
        applied_at: Utc::now(),
    };

    if report.created {
        db.execute(&gen.create_table(table, columns), &[])?;
        tracing::info!(table, columns = columns.len(), "created table");
        return Ok(report);
    }

    for col in columns {
        if existing.contains(&col.name.to_lowercase()) {
            continue;
        }
        db.execute(&gen.add_column(table, col), &[])?;
        report.added_columns.push(col.name.clone());
    }

    if !report.added_columns.is_empty() {
        tracing::info!(table, added = ?report.added_columns, "added missing columns");
    }
    Ok(report)
}

fn existing_columns(db: &Database, gen: &DialectGenerator, table: &str) -> Result<HashSet<String>> {
    let (sql, params) = gen.list_columns(table);
    let rows = db.query(&sql, &params)?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get("name").and_then(|v| v.as_str()))
        .map(str::to_lowercase)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::adapter::{ColumnType, SqliteDriver};
    use std::sync::Arc;

    fn memory_db() -> Database {
        Database::new(Arc::new(SqliteDriver::in_memory().unwrap()), "", false)
    }

    #[test]
    fn test_creates_then_noop() {
        let db = memory_db();
        let cols = vec![
            ColumnDef::primary_key("id"),
            ColumnDef::new("name", ColumnType::Text).not_null(),
        ];

        let first = auto_migrate(&db, "widgets", &cols).unwrap();
        assert!(first.created);

        let second = auto_migrate(&db, "widgets", &cols).unwrap();
        assert!(second.is_noop());
    }

    #[test]
    fn test_adds_missing_columns_only() {
        let db = memory_db();
        db.exec_sql("CREATE TABLE widgets (id INTEGER PRIMARY KEY, Name TEXT)", &[])
            .unwrap();
        db.exec_sql("INSERT INTO widgets (Name) VALUES ('old')", &[]).unwrap();

        let cols = vec![
            ColumnDef::primary_key("id"),
            ColumnDef::new("name", ColumnType::Text).not_null(),
            ColumnDef::new("qty", ColumnType::Integer).not_null(),
        ];
        let report = auto_migrate(&db, "widgets", &cols).unwrap();
        assert!(!report.created);
        assert_eq!(report.added_columns, vec!["qty".to_string()]);

        let rows = db.query("SELECT qty FROM widgets", &[]).unwrap();
        assert!(rows[0]["qty"].is_null());
    }
}
