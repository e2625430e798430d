//! SQL Dialect Generator
//!
//! Generates database-specific SQL for the record facades.
//! Supports MySQL, SQL Server, PostgreSQL and SQLite dialects.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::SqlValue;
use crate::engine::error::{DbError, Result};
use crate::engine::query::{CompareOp, Filter, OrderBy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    Mysql,
    Mssql,
    Postgres,
    Sqlite,
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlDialect::Mysql => write!(f, "mysql"),
            SqlDialect::Mssql => write!(f, "mssql"),
            SqlDialect::Postgres => write!(f, "postgres"),
            SqlDialect::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl SqlDialect {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mysql" | "mariadb" => Some(SqlDialect::Mysql),
            "mssql" | "sqlserver" => Some(SqlDialect::Mssql),
            "postgres" | "postgresql" | "pg" => Some(SqlDialect::Postgres),
            "sqlite" | "sqlite3" => Some(SqlDialect::Sqlite),
            _ => None,
        }
    }

    /// Build the driver connection string for this dialect.
    ///
    /// For SQLite `database` is the file path (or `:memory:`) and the
    /// network fields are ignored.
    pub fn dsn(&self, host: &str, port: u16, user: &str, pwd: &str, database: &str) -> String {
        match self {
            SqlDialect::Mysql => format!(
                "{}:{}@tcp({}:{})/{}?charset=utf8&parseTime=True&loc=Local",
                user, pwd, host, port, database
            ),
            SqlDialect::Mssql => format!(
                "sqlserver://{}:{}@{}:{}?database={}",
                user, pwd, host, port, database
            ),
            SqlDialect::Postgres => format!(
                "host={} port={} user={} dbname={} password={}",
                host, port, user, database, pwd
            ),
            SqlDialect::Sqlite => database.to_string(),
        }
    }
}

/// Portable column types a record field can map to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
    Json,
}

/// Column definition used by the dialect generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: ColumnType,
    pub nullable: bool,
    pub is_primary_key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, col_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            col_type,
            nullable: true,
            is_primary_key: false,
        }
    }

    /// The auto-increment identity column
    pub fn primary_key(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            col_type: ColumnType::Integer,
            nullable: false,
            is_primary_key: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// True if `name` is a plain SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_valid_ident(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn check_ident(name: &str) -> Result<()> {
    if is_valid_ident(name) {
        Ok(())
    } else {
        Err(DbError::InvalidArgument(format!("invalid identifier: {:?}", name)))
    }
}

/// SQL dialect-aware code generator
#[derive(Debug, Clone, Copy)]
pub struct DialectGenerator {
    pub dialect: SqlDialect,
}

impl DialectGenerator {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    /// Map a portable column type to the dialect-specific type
    pub fn map_type(&self, col_type: ColumnType) -> &'static str {
        match (self.dialect, col_type) {
            (SqlDialect::Sqlite, ColumnType::Integer) => "INTEGER",
            (SqlDialect::Postgres, ColumnType::Integer) => "BIGINT",
            (SqlDialect::Mysql, ColumnType::Integer) => "BIGINT",
            (SqlDialect::Mssql, ColumnType::Integer) => "BIGINT",

            (SqlDialect::Sqlite, ColumnType::Real) => "REAL",
            (SqlDialect::Postgres, ColumnType::Real) => "DOUBLE PRECISION",
            (SqlDialect::Mysql, ColumnType::Real) => "DOUBLE",
            (SqlDialect::Mssql, ColumnType::Real) => "FLOAT",

            (SqlDialect::Sqlite, ColumnType::Text) => "TEXT",
            (SqlDialect::Postgres, ColumnType::Text) => "TEXT",
            (SqlDialect::Mysql, ColumnType::Text) => "LONGTEXT",
            (SqlDialect::Mssql, ColumnType::Text) => "NVARCHAR(MAX)",

            (SqlDialect::Sqlite, ColumnType::Boolean) => "INTEGER",
            (SqlDialect::Postgres, ColumnType::Boolean) => "BOOLEAN",
            (SqlDialect::Mysql, ColumnType::Boolean) => "TINYINT(1)",
            (SqlDialect::Mssql, ColumnType::Boolean) => "BIT",

            (SqlDialect::Sqlite, ColumnType::Json) => "TEXT",
            (SqlDialect::Postgres, ColumnType::Json) => "JSONB",
            (SqlDialect::Mysql, ColumnType::Json) => "JSON",
            (SqlDialect::Mssql, ColumnType::Json) => "NVARCHAR(MAX)",
        }
    }

    /// Get the auto-increment syntax for a primary key column
    pub fn auto_increment_pk(&self, col_name: &str) -> String {
        let col = self.quote_ident(col_name);
        match self.dialect {
            SqlDialect::Sqlite => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", col),
            SqlDialect::Postgres => format!("{} SERIAL PRIMARY KEY", col),
            SqlDialect::Mysql => format!("{} INT UNSIGNED AUTO_INCREMENT PRIMARY KEY", col),
            SqlDialect::Mssql => format!("{} INT IDENTITY(1,1) PRIMARY KEY", col),
        }
    }

    /// Quote an identifier (table or column name)
    pub fn quote_ident(&self, name: &str) -> String {
        match self.dialect {
            SqlDialect::Sqlite | SqlDialect::Postgres => format!("\"{}\"", name),
            SqlDialect::Mysql => format!("`{}`", name),
            SqlDialect::Mssql => format!("[{}]", name),
        }
    }

    /// Bind placeholder for the `n`th parameter (1-based)
    pub fn placeholder(&self, n: usize) -> String {
        match self.dialect {
            SqlDialect::Sqlite => format!("?{}", n),
            SqlDialect::Postgres => format!("${}", n),
            SqlDialect::Mysql => "?".to_string(),
            SqlDialect::Mssql => format!("@p{}", n),
        }
    }

    fn column_def(&self, col: &ColumnDef) -> String {
        if col.is_primary_key {
            return self.auto_increment_pk(&col.name);
        }
        let mut def = format!("{} {}", self.quote_ident(&col.name), self.map_type(col.col_type));
        if !col.nullable {
            def.push_str(" NOT NULL");
        }
        def
    }

    /// Generate CREATE TABLE SQL that is a no-op when the table exists
    pub fn create_table(&self, table: &str, columns: &[ColumnDef]) -> String {
        let col_defs: Vec<String> = columns.iter().map(|c| self.column_def(c)).collect();
        let body = format!("{} (\n  {}\n)", self.quote_ident(table), col_defs.join(",\n  "));
        match self.dialect {
            SqlDialect::Mssql => format!(
                "IF OBJECT_ID(N'{}', N'U') IS NULL CREATE TABLE {};",
                table, body
            ),
            _ => format!("CREATE TABLE IF NOT EXISTS {};", body),
        }
    }

    /// Generate ALTER TABLE ADD COLUMN SQL
    pub fn add_column(&self, table: &str, col: &ColumnDef) -> String {
        let keyword = match self.dialect {
            SqlDialect::Mssql => "ADD",
            _ => "ADD COLUMN",
        };
        let mut col = col.clone();
        // Existing rows have no value for the new column.
        col.nullable = true;
        format!(
            "ALTER TABLE {} {} {};",
            self.quote_ident(table),
            keyword,
            self.column_def(&col)
        )
    }

    /// Query listing the column names of `table`; binds the table name as
    /// its only parameter and yields a `name` column.
    pub fn list_columns(&self, table: &str) -> (String, Vec<SqlValue>) {
        let sql = match self.dialect {
            SqlDialect::Sqlite => format!("SELECT name FROM pragma_table_info({})", self.placeholder(1)),
            _ => format!(
                "SELECT column_name AS name FROM information_schema.columns WHERE table_name = {}",
                self.placeholder(1)
            ),
        };
        (sql, vec![SqlValue::Text(table.to_string())])
    }

    /// Render `filter` as a WHERE clause, numbering placeholders after
    /// `offset` already-bound parameters.
    pub fn where_clause(&self, filter: &Filter, offset: usize) -> Result<(String, Vec<SqlValue>)> {
        let mut parts = Vec::with_capacity(filter.len());
        let mut params = Vec::new();

        for cond in filter.conditions() {
            check_ident(&cond.field)?;
            let col = self.quote_ident(&cond.field);
            if cond.value.is_null() {
                match cond.op {
                    CompareOp::Eq => parts.push(format!("{} IS NULL", col)),
                    CompareOp::Ne => parts.push(format!("{} IS NOT NULL", col)),
                    _ => {
                        return Err(DbError::InvalidArgument(format!(
                            "operator {} cannot compare {} with null",
                            cond.op.to_sql(),
                            cond.field
                        )))
                    }
                }
                continue;
            }
            params.push(SqlValue::from_json(&cond.value));
            parts.push(format!(
                "{} {} {}",
                col,
                cond.op.to_sql(),
                self.placeholder(offset + params.len())
            ));
        }

        if parts.is_empty() {
            Ok((String::new(), params))
        } else {
            Ok((format!(" WHERE {}", parts.join(" AND ")), params))
        }
    }

    fn order_clause(&self, order_by: &[OrderBy]) -> Result<String> {
        if order_by.is_empty() {
            return Ok(String::new());
        }
        let mut terms = Vec::with_capacity(order_by.len());
        for o in order_by {
            check_ident(&o.column)?;
            terms.push(format!("{} {}", self.quote_ident(&o.column), o.direction));
        }
        Ok(format!(" ORDER BY {}", terms.join(", ")))
    }

    /// Generate SELECT with optional filter, ordering and paging
    pub fn select(
        &self,
        table: &str,
        filter: &Filter,
        order_by: &[OrderBy],
        limit: Option<u32>,
        skip: u32,
    ) -> Result<(String, Vec<SqlValue>)> {
        check_ident(table)?;
        let (where_sql, params) = self.where_clause(filter, 0)?;
        let mut order_sql = self.order_clause(order_by)?;

        let paging = match self.dialect {
            SqlDialect::Mssql => {
                if limit.is_none() && skip == 0 {
                    String::new()
                } else {
                    // OFFSET/FETCH is only valid after ORDER BY.
                    if order_sql.is_empty() {
                        order_sql = " ORDER BY (SELECT NULL)".to_string();
                    }
                    match limit {
                        Some(n) => format!(" OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", skip, n),
                        None => format!(" OFFSET {} ROWS", skip),
                    }
                }
            }
            _ => match (limit, skip) {
                (Some(n), 0) => format!(" LIMIT {}", n),
                (Some(n), s) => format!(" LIMIT {} OFFSET {}", n, s),
                (None, 0) => String::new(),
                // SQLite and MySQL need a LIMIT before OFFSET.
                (None, s) => match self.dialect {
                    SqlDialect::Postgres => format!(" OFFSET {}", s),
                    _ => format!(" LIMIT {} OFFSET {}", i64::MAX, s),
                },
            },
        };

        Ok((
            format!(
                "SELECT * FROM {}{}{}{}",
                self.quote_ident(table),
                where_sql,
                order_sql,
                paging
            ),
            params,
        ))
    }

    /// Generate INSERT for the given columns
    pub fn insert(&self, table: &str, columns: &[&str]) -> Result<String> {
        check_ident(table)?;
        let mut names = Vec::with_capacity(columns.len());
        for c in columns {
            check_ident(c)?;
            names.push(self.quote_ident(c));
        }
        if columns.is_empty() {
            return Ok(match self.dialect {
                SqlDialect::Mysql => format!("INSERT INTO {} () VALUES ()", self.quote_ident(table)),
                _ => format!("INSERT INTO {} DEFAULT VALUES", self.quote_ident(table)),
            });
        }
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| self.placeholder(i)).collect();
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_ident(table),
            names.join(", "),
            placeholders.join(", ")
        ))
    }

    /// Generate UPDATE of `columns` for the row whose `key` matches; the
    /// key is bound after the column values.
    pub fn update_by_key(&self, table: &str, columns: &[&str], key: &str) -> Result<String> {
        check_ident(table)?;
        check_ident(key)?;
        let mut sets = Vec::with_capacity(columns.len());
        for (i, c) in columns.iter().enumerate() {
            check_ident(c)?;
            sets.push(format!("{} = {}", self.quote_ident(c), self.placeholder(i + 1)));
        }
        Ok(format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.quote_ident(table),
            sets.join(", "),
            self.quote_ident(key),
            self.placeholder(columns.len() + 1)
        ))
    }

    /// Generate DELETE restricted by `filter`
    pub fn delete(&self, table: &str, filter: &Filter) -> Result<(String, Vec<SqlValue>)> {
        check_ident(table)?;
        let (where_sql, params) = self.where_clause(filter, 0)?;
        Ok((
            format!("DELETE FROM {}{}", self.quote_ident(table), where_sql),
            params,
        ))
    }

    pub fn begin(&self) -> &'static str {
        match self.dialect {
            SqlDialect::Mysql => "START TRANSACTION",
            SqlDialect::Mssql => "BEGIN TRANSACTION",
            SqlDialect::Postgres | SqlDialect::Sqlite => "BEGIN",
        }
    }

    pub fn commit(&self) -> &'static str {
        match self.dialect {
            SqlDialect::Mssql => "COMMIT TRANSACTION",
            _ => "COMMIT",
        }
    }

    pub fn rollback(&self) -> &'static str {
        match self.dialect {
            SqlDialect::Mssql => "ROLLBACK TRANSACTION",
            _ => "ROLLBACK",
        }
    }
}
