//! Named connections
//!
//! A [`Registry`] is constructed explicitly and handed to every
//! [`Context`](crate::orm::Context); there is no process-wide connection state.

use crate::core::database::Database;
use crate::core::dialect::Dialect;
use crate::core::error::{DatabaseError, Result};
use crate::core::transaction::{TransactionHandle, TransactionKey, TransactionStack};
use crate::core::value::{DatabaseResult, DatabaseValue, ExecResult};
use crate::orm::config::ConnectionConfig;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A driver handle with its dialect, table prefix and transaction stack
pub struct Connection {
    name: String,
    database: Arc<dyn Database>,
    dialect: Dialect,
    prefix: String,
    stack: TransactionStack,
}

impl Connection {
    pub fn new(name: impl Into<String>, database: Arc<dyn Database>) -> Self {
        let dialect = database.dialect();
        Self {
            name: name.into(),
            database,
            dialect,
            prefix: String::new(),
            stack: TransactionStack::new(),
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    pub fn stack(&self) -> &TransactionStack {
        &self.stack
    }

    /// Most recently opened transaction on this connection
    pub fn current(&self) -> Option<TransactionHandle> {
        self.stack.current()
    }

    /// Open a transaction, nested inside `parent` when one is given.
    ///
    /// Without a parent the new transaction is a root of its own, however many
    /// others are open on this connection.
    pub async fn begin(&self, parent: Option<TransactionKey>) -> Result<TransactionKey> {
        let parent = self.resolve(parent)?;
        let handle = self.stack.begin(parent.as_ref());
        if let Err(err) = self.database.begin_transaction(&handle).await {
            self.stack.finish(handle.key);
            return Err(err);
        }

        tracing::debug!(
            connection = %self.name,
            key = handle.key,
            root = handle.root,
            savepoint = ?handle.savepoint,
            "Began transaction"
        );
        Ok(handle.key)
    }

    /// Commit `key`. The key is released whether or not the driver succeeds.
    pub async fn commit(&self, key: TransactionKey) -> Result<()> {
        let handle = self
            .stack
            .handle(key)
            .ok_or(DatabaseError::UnknownTransactionKey(key))?;
        let result = self.database.commit(&handle).await;
        self.stack.finish(key);
        tracing::debug!(connection = %self.name, key, ok = result.is_ok(), "Committed transaction");
        result
    }

    /// Roll back `key`. The key is released whether or not the driver succeeds.
    pub async fn rollback(&self, key: TransactionKey) -> Result<()> {
        let handle = self
            .stack
            .handle(key)
            .ok_or(DatabaseError::UnknownTransactionKey(key))?;
        let result = self.database.rollback(&handle).await;
        self.stack.finish(key);
        tracing::debug!(connection = %self.name, key, ok = result.is_ok(), "Rolled back transaction");
        result
    }

    fn resolve(&self, key: Option<TransactionKey>) -> Result<Option<TransactionHandle>> {
        match key {
            Some(key) => self
                .stack
                .handle(key)
                .map(Some)
                .ok_or(DatabaseError::UnknownTransactionKey(key)),
            None => Ok(None),
        }
    }

    /// Run a statement inside `key`, or directly on the connection
    pub async fn execute(
        &self,
        key: Option<TransactionKey>,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<ExecResult> {
        let handle = self.resolve(key)?;
        tracing::debug!(connection = %self.name, tx = ?key, sql, params = params.len(), "Executing statement");
        self.database
            .execute_with_params(handle.as_ref(), sql, params)
            .await
    }

    /// Run a query inside `key`, or directly on the connection
    pub async fn query(
        &self,
        key: Option<TransactionKey>,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        let handle = self.resolve(key)?;
        tracing::debug!(connection = %self.name, tx = ?key, sql, params = params.len(), "Running query");
        self.database
            .query_with_params(handle.as_ref(), sql, params)
            .await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("dialect", &self.dialect)
            .field("prefix", &self.prefix)
            .field("open_transactions", &self.stack.depth())
            .finish()
    }
}

/// Connections by name
#[derive(Debug)]
pub struct Registry {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    default: RwLock<String>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Empty registry whose default connection name is `default`
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            default: RwLock::new("default".to_string()),
        }
    }

    /// Add or replace a connection under its own name
    pub fn register(&self, connection: Connection) -> Arc<Connection> {
        let connection = Arc::new(connection);
        tracing::info!(connection = %connection.name, dialect = %connection.dialect, "Registered connection");
        self.connections
            .write()
            .insert(connection.name.clone(), connection.clone());
        connection
    }

    pub fn set_default(&self, name: impl Into<String>) {
        *self.default.write() = name.into();
    }

    pub fn default_name(&self) -> String {
        self.default.read().clone()
    }

    /// Connection by name; `None` selects the default
    pub fn get(&self, name: Option<&str>) -> Result<Arc<Connection>> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self.default_name(),
        };
        self.connections
            .read()
            .get(&name)
            .cloned()
            .ok_or_else(|| DatabaseError::configuration(format!("unknown connection: '{}'", name)))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove a connection and disconnect its driver
    pub async fn close(&self, name: &str) -> Result<()> {
        let removed = self.connections.write().remove(name);
        match removed {
            Some(connection) => {
                tracing::info!(connection = %name, "Closing connection");
                connection.database.disconnect().await
            }
            None => Err(DatabaseError::configuration(format!(
                "unknown connection: '{}'",
                name
            ))),
        }
    }

    pub async fn close_all(&self) -> Result<()> {
        for name in self.names() {
            self.close(&name).await?;
        }
        Ok(())
    }

    /// Open a SQLite database described by `config` and register it
    #[cfg(feature = "sqlite")]
    pub async fn connect_sqlite(&self, config: &ConnectionConfig) -> Result<Arc<Connection>> {
        use crate::backends::SqliteDatabase;

        if config.dialect != Dialect::Sqlite {
            return Err(DatabaseError::configuration(format!(
                "no bundled driver for dialect '{}'",
                config.dialect
            )));
        }

        let mut database = SqliteDatabase::new();
        if let Some(timeout) = config.operation_timeout() {
            database = database.with_timeout(timeout);
        }
        database.connect(&config.database).await?;

        let connection = Connection::new(config.name.clone(), Arc::new(database))
            .with_prefix(config.prefix.clone());
        Ok(self.register(connection))
    }
}
