//! recordkit Configuration Module
//! Connection parameters, and loading/saving recordkit.config.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::adapter::SqlDialect;

pub const CONFIG_FILE: &str = "recordkit.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Relational connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    #[serde(deserialize_with = "dialect_by_name")]
    pub dialect: SqlDialect,
    #[serde(default = "default_host")]
    pub host: String,
    /// 0 means the dialect's default port
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    /// Database name, or the file path for SQLite
    pub database: String,
    #[serde(default)]
    pub table_prefix: String,
    /// Log every statement at info level
    #[serde(default)]
    pub debug: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Accept dialect aliases such as `postgresql` or `sqlite3`
fn dialect_by_name<'de, D>(deserializer: D) -> Result<SqlDialect, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    SqlDialect::from_name(&name)
        .ok_or_else(|| serde::de::Error::custom(format!("unknown SQL dialect: {}", name)))
}

impl ConnectParams {
    pub fn new(dialect: SqlDialect, database: &str) -> Self {
        Self {
            dialect,
            host: default_host(),
            port: default_port(dialect),
            user: String::new(),
            password: String::new(),
            database: database.to_string(),
            table_prefix: String::new(),
            debug: false,
        }
    }

    pub fn sqlite(path: &str) -> Self {
        Self::new(SqlDialect::Sqlite, path)
    }

    pub fn with_server(mut self, host: &str, port: u16) -> Self {
        self.host = host.to_string();
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, user: &str, password: &str) -> Self {
        self.user = user.to_string();
        self.password = password.to_string();
        self
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.table_prefix = prefix.to_string();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Driver connection string
    pub fn dsn(&self) -> String {
        self.dialect
            .dsn(&self.host, self.port, &self.user, &self.password, &self.database)
    }

    /// Connection string safe for logs and error messages
    pub fn redacted_dsn(&self) -> String {
        let pwd = if self.password.is_empty() { "" } else { "***" };
        self.dialect.dsn(&self.host, self.port, &self.user, pwd, &self.database)
    }
}

/// Well-known server port for each dialect; 0 for SQLite
pub fn default_port(dialect: SqlDialect) -> u16 {
    match dialect {
        SqlDialect::Mysql => 3306,
        SqlDialect::Mssql => 1433,
        SqlDialect::Postgres => 5432,
        SqlDialect::Sqlite => 0,
    }
}

/// Document store parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentParams {
    /// Directory holding the embedded store
    pub root: PathBuf,
    pub database: String,
    #[serde(default)]
    pub collection_prefix: String,
}

impl DocumentParams {
    pub fn new(root: impl Into<PathBuf>, database: &str) -> Self {
        Self {
            root: root.into(),
            database: database.to_string(),
            collection_prefix: String::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.collection_prefix = prefix.to_string();
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sql: Option<ConnectParams>,
    #[serde(default)]
    pub document: Option<DocumentParams>,
}

impl Config {
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path));
        }
        let content = std::fs::read_to_string(&config_path)?;
        let mut config: Config = serde_json::from_str(&content)?;
        if let Some(sql) = config.sql.as_mut() {
            if sql.port == 0 {
                sql.port = default_port(sql.dialect);
            }
        }
        Ok(config)
    }

    pub fn save(&self, project_dir: &Path) -> Result<(), ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_redacted_dsn() {
        let params = ConnectParams::new(SqlDialect::Mysql, "shop")
            .with_server("db.local", 3306)
            .with_credentials("root", "hunter2");
        assert!(params.dsn().contains("hunter2"));
        assert_eq!(
            params.redacted_dsn(),
            "root:***@tcp(db.local:3306)/shop?charset=utf8&parseTime=True&loc=Local"
        );
    }

    #[test]
    fn test_defaults_when_loading() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"sql": {"dialect": "postgresql", "database": "shop", "password": "pw"}}"#,
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        let sql = config.sql.unwrap();
        assert_eq!(sql.dialect, SqlDialect::Postgres);
        assert_eq!(sql.host, "127.0.0.1");
        assert_eq!(sql.port, 5432);
        assert!(sql.dsn().contains("port=5432"));
        assert_eq!(sql.password, "pw");
        assert!(!sql.debug);
        assert!(config.document.is_none());
    }

    #[test]
    fn test_save_omits_password() {
        let dir = tempdir().unwrap();
        let config = Config {
            sql: Some(ConnectParams::sqlite("data/app.db").with_credentials("u", "secret").with_prefix("app")),
            document: Some(DocumentParams::new("docs", "main")),
        };
        config.save(dir.path()).unwrap();

        let raw = std::fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap();
        assert!(!raw.contains("secret"));

        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.sql.unwrap().table_prefix, "app");
    }

    #[test]
    fn test_unknown_dialect_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"sql": {"dialect": "oracle", "database": "shop"}}"#,
        )
        .unwrap();
        assert!(matches!(Config::load(dir.path()), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_missing_config() {
        let dir = tempdir().unwrap();
        assert!(matches!(Config::load(dir.path()), Err(ConfigError::NotFound(_))));
    }
}
