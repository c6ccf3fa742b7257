//! Driver boundary
//!
//! This module defines the trait every backend implements. The ORM layer only
//! ever talks to a driver through it, which keeps the trait object-safe so
//! connections can be held as `Arc<dyn Database>`.

use super::dialect::Dialect;
use super::error::Result;
use super::transaction::TransactionHandle;
use super::value::{DatabaseResult, DatabaseValue, ExecResult};
use async_trait::async_trait;

/// Core database trait that all database backends must implement
#[async_trait]
pub trait Database: Send + Sync {
    /// SQL dialect spoken by this backend
    fn dialect(&self) -> Dialect;

    /// Connect to the database with the given connection string
    ///
    /// # Thread Safety
    /// This method uses interior mutability so it's safe to call from multiple
    /// threads concurrently, though only one connection operation will proceed
    /// at a time.
    async fn connect(&self, connection_string: &str) -> Result<()>;

    /// Check if connected to the database
    fn is_connected(&self) -> bool;

    /// Disconnect from the database
    async fn disconnect(&self) -> Result<()>;

    /// Execute a parameterized statement that doesn't return rows.
    ///
    /// `tx` is the transaction the statement belongs to, or `None` to run it
    /// directly on the connection.
    async fn execute_with_params(
        &self,
        tx: Option<&TransactionHandle>,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<ExecResult>;

    /// Execute a parameterized query and return its rows
    async fn query_with_params(
        &self,
        tx: Option<&TransactionHandle>,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult>;

    /// Execute raw SQL that doesn't return rows
    ///
    /// # Security Warning
    ///
    /// **SQL Injection Risk**: the text is sent as is. Use
    /// `execute_with_params()` for anything built from user input.
    async fn execute(&self, query: &str) -> Result<u64> {
        Ok(self.execute_with_params(None, query, &[]).await?.rows_affected)
    }

    /// Execute raw SQL and return its rows
    ///
    /// # Security Warning
    ///
    /// **SQL Injection Risk**: the text is sent as is. Use
    /// `query_with_params()` for anything built from user input.
    async fn query(&self, query: &str) -> Result<DatabaseResult> {
        self.query_with_params(None, query, &[]).await
    }

    /// Open the transaction described by `tx`.
    ///
    /// Handles without a savepoint are independent roots: statements under
    /// different roots, and statements with no handle, must not share a
    /// transaction. Nested handles carry a savepoint name inside their `root`;
    /// backends without savepoint support should reject them with a
    /// transaction error.
    async fn begin_transaction(&self, tx: &TransactionHandle) -> Result<()>;

    /// Commit the transaction described by `tx`
    async fn commit(&self, tx: &TransactionHandle) -> Result<()>;

    /// Roll back the transaction described by `tx`
    async fn rollback(&self, tx: &TransactionHandle) -> Result<()>;
}
