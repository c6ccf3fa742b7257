//! Connection configuration
//!
//! ```json
//! { "name": "default", "dialect": "sqlite", "database": ":memory:", "prefix": "app_" }
//! ```

use crate::core::dialect::Dialect;
use crate::core::error::Result;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

fn default_name() -> String {
    "default".to_string()
}

/// Settings for one named connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Name the connection is registered under
    #[serde(default = "default_name")]
    pub name: String,
    pub dialect: Dialect,
    /// Driver connection string; a file path for SQLite
    pub database: String,
    /// Prepended to every table name
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub operation_timeout_ms: Option<u64>,
}

/// Document form, parsed before the dialect name is checked so an unknown
/// dialect reports as a configuration error rather than a syntax one
#[derive(Deserialize)]
struct RawConnectionConfig {
    #[serde(default = "default_name")]
    name: String,
    dialect: String,
    database: String,
    #[serde(default)]
    prefix: String,
    #[serde(default)]
    operation_timeout_ms: Option<u64>,
}

impl TryFrom<RawConnectionConfig> for ConnectionConfig {
    type Error = crate::core::error::DatabaseError;

    fn try_from(raw: RawConnectionConfig) -> Result<Self> {
        Ok(Self {
            name: raw.name,
            dialect: Dialect::from_str(&raw.dialect)?,
            database: raw.database,
            prefix: raw.prefix,
            operation_timeout_ms: raw.operation_timeout_ms,
        })
    }
}

impl ConnectionConfig {
    /// SQLite connection named `default`
    pub fn sqlite(database: impl Into<String>) -> Self {
        Self {
            name: default_name(),
            dialect: Dialect::Sqlite,
            database: database.into(),
            prefix: String::new(),
            operation_timeout_ms: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Parse a single connection object
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawConnectionConfig = serde_json::from_str(json)?;
        raw.try_into()
    }

    /// Parse an array of connection objects
    pub fn list_from_json(json: &str) -> Result<Vec<Self>> {
        let raw: Vec<RawConnectionConfig> = serde_json::from_str(json)?;
        raw.into_iter().map(Self::try_from).collect()
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::DatabaseError;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::from_json(r#"{"dialect": "sqlite3", "database": "app.db"}"#)
            .unwrap();
        assert_eq!(config, ConnectionConfig::sqlite("app.db"));
        assert_eq!(config.operation_timeout(), None);
    }

    #[test]
    fn test_full_document() {
        let configs = ConnectionConfig::list_from_json(
            r#"[
                {"name": "reports", "dialect": "mssql", "database": "server=db", "prefix": "rpt_", "operation_timeout_ms": 1500},
                {"dialect": "mysql", "database": "root@/shop"}
            ]"#,
        )
        .unwrap();
        assert_eq!(configs[0].name, "reports");
        assert_eq!(configs[0].dialect, Dialect::Mssql);
        assert_eq!(configs[0].prefix, "rpt_");
        assert_eq!(configs[0].operation_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(configs[1].name, "default");
    }

    #[test]
    fn test_unsupported_dialect() {
        let err = ConnectionConfig::from_json(r#"{"dialect": "oracle", "database": "x"}"#).unwrap_err();
        assert!(matches!(err, DatabaseError::Configuration(_)));
        assert!(err.to_string().contains("unsupported dialect"));

        let err = ConnectionConfig::list_from_json(
            r#"[{"dialect": "sqlite", "database": "a.db"}, {"dialect": "db2", "database": "b"}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, DatabaseError::Configuration(_)));
    }

    #[test]
    fn test_malformed_document_is_a_parse_error() {
        let err = ConnectionConfig::from_json(r#"{"dialect": "sqlite""#).unwrap_err();
        assert!(matches!(err, DatabaseError::Json(_)));
        let err = ConnectionConfig::from_json(r#"{"database": "x"}"#).unwrap_err();
        assert!(matches!(err, DatabaseError::Json(_)));
    }
}
