//! SQL dialect definitions
//!
//! A dialect captures the syntax differences the query builder has to care
//! about: identifier quoting, pagination and how an insert reports the
//! identity it generated.

use crate::core::error::DatabaseError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported SQL dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Dialect {
    /// MySQL/MariaDB
    Mysql,
    /// Microsoft SQL Server
    Mssql,
    /// SQLite
    #[default]
    Sqlite,
}

/// How the identity generated by an insert is retrieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityRetrieval {
    /// Read from the driver's execute result
    LastInsertId,
    /// The insert carries a trailing select; scan its first row
    TrailingSelect,
}

/// Pagination fragments for one statement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pagination {
    /// Placed right after `SELECT`, e.g. `TOP 3 `
    pub prefix: String,
    /// Appended after ORDER BY
    pub suffix: String,
}

impl Dialect {
    /// Convert dialect to string representation
    pub fn to_str(&self) -> &'static str {
        match self {
            Dialect::Mysql => "mysql",
            Dialect::Mssql => "mssql",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Quote an identifier
    pub fn quote(&self, ident: &str) -> String {
        match self {
            Dialect::Mssql => format!("[{}]", ident),
            Dialect::Mysql | Dialect::Sqlite => format!("`{}`", ident),
        }
    }

    /// Positional placeholder; every supported driver binds by position
    pub fn placeholder(&self) -> &'static str {
        "?"
    }

    pub fn identity_retrieval(&self) -> IdentityRetrieval {
        match self {
            Dialect::Mssql => IdentityRetrieval::TrailingSelect,
            Dialect::Mysql | Dialect::Sqlite => IdentityRetrieval::LastInsertId,
        }
    }

    /// Trailing statement that yields the identity of the last insert
    pub fn identity_select(&self) -> Option<&'static str> {
        match self {
            Dialect::Mssql => Some("; SELECT CONVERT(BIGINT, SCOPE_IDENTITY()) AS [ID]"),
            Dialect::Mysql | Dialect::Sqlite => None,
        }
    }

    /// Column list used by an insert that writes no columns
    pub fn empty_insert(&self) -> &'static str {
        match self {
            Dialect::Mysql => " () VALUES ()",
            Dialect::Mssql | Dialect::Sqlite => " DEFAULT VALUES",
        }
    }

    /// Render pagination for a select.
    ///
    /// SQL Server only knows `OFFSET .. ROWS FETCH NEXT .. ROWS ONLY`, which
    /// needs an offset and an ORDER BY, so a bare limit becomes a `TOP` prefix.
    pub fn pagination(&self, offset: Option<u64>, limit: Option<u64>, ordered: bool) -> Pagination {
        let mut page = Pagination::default();
        match self {
            Dialect::Mssql => match (offset, limit) {
                (None, None) => {}
                (None, Some(limit)) => page.prefix = format!("TOP {} ", limit),
                (Some(offset), limit) => {
                    if !ordered {
                        page.suffix.push_str(" ORDER BY (SELECT NULL)");
                    }
                    page.suffix.push_str(&format!(" OFFSET {} ROWS", offset));
                    if let Some(limit) = limit {
                        page.suffix.push_str(&format!(" FETCH NEXT {} ROWS ONLY", limit));
                    }
                }
            },
            Dialect::Mysql | Dialect::Sqlite => {
                match (offset, limit) {
                    (_, Some(limit)) => page.suffix = format!(" LIMIT {}", limit),
                    // OFFSET is only valid after a LIMIT
                    (Some(_), None) if *self == Dialect::Mysql => {
                        page.suffix = " LIMIT 18446744073709551615".to_string()
                    }
                    (Some(_), None) => page.suffix = " LIMIT -1".to_string(),
                    (None, None) => {}
                }
                if let Some(offset) = offset {
                    page.suffix.push_str(&format!(" OFFSET {}", offset));
                }
            }
        }
        page
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl FromStr for Dialect {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            "mssql" | "sqlserver" => Ok(Dialect::Mssql),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            _ => Err(DatabaseError::configuration(format!(
                "unsupported dialect: '{}'",
                s
            ))),
        }
    }
}

impl TryFrom<String> for Dialect {
    type Error = DatabaseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Dialect> for String {
    fn from(dialect: Dialect) -> Self {
        dialect.to_str().to_string()
    }
}
