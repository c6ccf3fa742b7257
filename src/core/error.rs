//! Error types for the ORM engine
//!
//! Every fallible operation in the crate returns [`Result`]. Driver failures are
//! wrapped together with the SQL text that produced them so a caller can tell
//! which statement broke without turning on statement logging.

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Error types for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Missing table name, unsupported dialect, unknown connection name
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Statement preparation failed
    #[error("Prepare failed for `{sql}`: {source}")]
    Prepare {
        sql: String,
        #[source]
        source: BoxedSource,
    },

    /// Statement execution failed
    #[error("Exec failed for `{sql}`: {source}")]
    Exec {
        sql: String,
        #[source]
        source: BoxedSource,
    },

    /// Query or row fetch failed
    #[error("Query failed for `{sql}`: {source}")]
    Query {
        sql: String,
        #[source]
        source: BoxedSource,
    },

    /// Type conversion error
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Commit or rollback on a key that has no active transaction
    #[error("Unknown transaction key: {0}")]
    UnknownTransactionKey(u32),

    /// Failure while eager loading or cascading an association
    #[error("Relation `{association}` failed: {source}")]
    Relation {
        association: String,
        #[source]
        source: Box<DatabaseError>,
    },

    /// Connection error (generic)
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Query timeout
    #[error("Query timeout after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    /// Transaction error reported by the driver itself
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// SQLite error
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// Configuration document could not be parsed
    #[error("Invalid configuration document: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DatabaseError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Configuration(msg.into())
    }

    /// Wrap a driver error raised while preparing `sql`
    pub fn prepare<E>(sql: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxedSource>,
    {
        DatabaseError::Prepare {
            sql: sql.into(),
            source: source.into(),
        }
    }

    /// Wrap a driver error raised while executing `sql`
    pub fn exec<E>(sql: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxedSource>,
    {
        DatabaseError::Exec {
            sql: sql.into(),
            source: source.into(),
        }
    }

    /// Wrap a driver error raised while reading rows for `sql`
    pub fn query<E>(sql: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxedSource>,
    {
        DatabaseError::Query {
            sql: sql.into(),
            source: source.into(),
        }
    }

    /// Create a new type mismatch error
    pub fn type_mismatch(expected: &str, actual: &str) -> Self {
        DatabaseError::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Attach the association name to an error raised while resolving it
    pub fn relation(association: impl Into<String>, source: DatabaseError) -> Self {
        DatabaseError::Relation {
            association: association.into(),
            source: Box::new(source),
        }
    }

    /// Create a new connection error (generic)
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        DatabaseError::ConnectionError(msg.into())
    }

    /// Create a query timeout error
    pub fn query_timeout(timeout_ms: u64) -> Self {
        DatabaseError::QueryTimeout { timeout_ms }
    }

    /// Create a new transaction error
    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        DatabaseError::TransactionError(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Other(msg.into())
    }

    /// The innermost error, looking through relation wrappers
    pub fn root(&self) -> &DatabaseError {
        match self {
            DatabaseError::Relation { source, .. } => source.root(),
            other => other,
        }
    }
}
