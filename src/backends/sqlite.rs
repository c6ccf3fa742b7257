//! SQLite database backend implementation
//!
//! Connections come from a deadpool-sqlite pool. A root transaction holds one
//! pooled connection from `BEGIN` until it commits or rolls back, and its
//! savepoints run on that same connection. Statements issued outside any
//! transaction borrow an idle connection from the pool, so they never land in
//! a transaction somebody else has open.

use crate::core::{
    database::Database,
    dialect::Dialect,
    error::{DatabaseError, Result},
    transaction::{TransactionHandle, TransactionKey},
    value::{DatabaseResult, DatabaseRow, DatabaseValue, ExecResult},
};
use async_trait::async_trait;
use deadpool_sqlite::{Config, Object, Pool, Runtime};
use parking_lot::{Mutex, RwLock};
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, Row, ToSql};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default timeout for database operations (30 seconds)
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

static MEMORY_DATABASES: AtomicUsize = AtomicUsize::new(0);

impl ToSql for DatabaseValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            DatabaseValue::Null => ToSqlOutput::Owned(Value::Null),
            DatabaseValue::Bool(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            DatabaseValue::Int(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            DatabaseValue::Long(v) | DatabaseValue::Timestamp(v) => {
                ToSqlOutput::Owned(Value::Integer(*v))
            }
            DatabaseValue::Float(v) => ToSqlOutput::Owned(Value::Real(f64::from(*v))),
            DatabaseValue::Double(v) => ToSqlOutput::Owned(Value::Real(*v)),
            DatabaseValue::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            DatabaseValue::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b.as_slice())),
        })
    }
}

/// Path handed to the pool.
///
/// Every pooled connection to `:memory:` would open a private database, so
/// in-memory requests become a uniquely named shared-cache URI instead.
fn database_path(connection_string: &str) -> String {
    match connection_string {
        "" | ":memory:" => format!(
            "file:rust_orm_memdb_{}?mode=memory&cache=shared",
            MEMORY_DATABASES.fetch_add(1, Ordering::Relaxed)
        ),
        path => path.to_string(),
    }
}

fn run_batch(conn: &Connection, sql: &str) -> Result<()> {
    conn.execute_batch(sql)
        .map_err(|e| DatabaseError::exec(sql, e))
}

/// Foreign key enforcement is per connection, and pooled connections are
/// created lazily
fn enable_foreign_keys(conn: &Connection) -> Result<()> {
    run_batch(conn, "PRAGMA foreign_keys = ON")
}

/// SQLite database implementation
pub struct SqliteDatabase {
    pool: RwLock<Option<Pool>>,
    /// Connections pinned by open root transactions
    sessions: Mutex<HashMap<TransactionKey, Arc<Object>>>,
    operation_timeout: Duration,
}

impl SqliteDatabase {
    /// Create a new SQLite database instance
    pub fn new() -> Self {
        Self {
            pool: RwLock::new(None),
            sessions: Mutex::new(HashMap::new()),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Override the per-operation timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Whether any root transaction is holding a connection
    pub fn in_transaction(&self) -> bool {
        !self.sessions.lock().is_empty()
    }

    /// Convert a rusqlite Row to a DatabaseRow
    fn row_to_database_row(row: &Row) -> rusqlite::Result<DatabaseRow> {
        let statement = row.as_ref();
        let mut db_row = DatabaseRow::with_capacity(statement.column_count());

        for i in 0..statement.column_count() {
            let column_name = statement.column_name(i)?.to_string();
            let value = match row.get_ref(i)? {
                ValueRef::Null => DatabaseValue::Null,
                ValueRef::Integer(v) => DatabaseValue::Long(v),
                ValueRef::Real(v) => DatabaseValue::Double(v),
                ValueRef::Text(v) => DatabaseValue::String(String::from_utf8_lossy(v).into_owned()),
                ValueRef::Blob(v) => DatabaseValue::Bytes(v.to_vec()),
            };
            db_row.insert(column_name, value);
        }

        Ok(db_row)
    }

    fn pool(&self) -> Result<Pool> {
        self.pool
            .read()
            .as_ref()
            .filter(|pool| !pool.is_closed())
            .cloned()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))
    }

    fn timeout_error(&self) -> DatabaseError {
        DatabaseError::query_timeout(self.operation_timeout.as_millis() as u64)
    }

    /// Take an idle connection from the pool
    async fn acquire(&self) -> Result<Object> {
        let pool = self.pool()?;
        tokio::time::timeout(self.operation_timeout, pool.get())
            .await
            .map_err(|_| self.timeout_error())?
            .map_err(|e| DatabaseError::connection(format!("Failed to acquire connection: {}", e)))
    }

    /// Connection pinned by the root of `tx`
    fn session(&self, tx: &TransactionHandle) -> Result<Arc<Object>> {
        self.sessions.lock().get(&tx.root).cloned().ok_or_else(|| {
            DatabaseError::transaction(format!("no open session for transaction {}", tx.root))
        })
    }

    fn take_session(&self, tx: &TransactionHandle) -> Result<Arc<Object>> {
        self.sessions.lock().remove(&tx.key).ok_or_else(|| {
            DatabaseError::transaction(format!("no open session for transaction {}", tx.key))
        })
    }

    /// Run `f` on `conn`'s blocking thread, bounded by the operation timeout
    async fn interact<T, F>(&self, conn: &Object, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        tokio::time::timeout(self.operation_timeout, conn.interact(f))
            .await
            .map_err(|_| self.timeout_error())?
            .map_err(|e| DatabaseError::other(format!("Interact error: {}", e)))?
    }

    /// Run `f` inside `tx`'s session, or on a pooled connection outside any
    /// transaction
    async fn run<T, F>(&self, tx: Option<&TransactionHandle>, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        match tx {
            Some(tx) => {
                let session = self.session(tx)?;
                self.interact(&session, f).await
            }
            None => {
                let conn = self.acquire().await?;
                self.interact(&conn, move |conn| {
                    enable_foreign_keys(conn)?;
                    f(conn)
                })
                .await
            }
        }
    }

    /// Undo whatever a failed `COMMIT` left open before the connection goes
    /// back to the pool
    async fn discard(&self, session: &Object, key: TransactionKey) {
        let cleanup = self
            .interact(session, |conn| {
                if conn.is_autocommit() {
                    Ok(())
                } else {
                    run_batch(conn, "ROLLBACK")
                }
            })
            .await;
        if let Err(err) = cleanup {
            tracing::warn!(key, error = %err, "Rollback after failed commit also failed");
        }
    }
}

impl Default for SqliteDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn connect(&self, connection_string: &str) -> Result<()> {
        let pool = Config::new(database_path(connection_string))
            .create_pool(Runtime::Tokio1)
            .map_err(|e| DatabaseError::connection(format!("Failed to create pool: {}", e)))?;

        let conn = tokio::time::timeout(self.operation_timeout, pool.get())
            .await
            .map_err(|_| {
                DatabaseError::connection(format!(
                    "Connection timeout after {}ms",
                    self.operation_timeout.as_millis()
                ))
            })?
            .map_err(|e| {
                DatabaseError::connection(format!("Failed to acquire initial connection: {}", e))
            })?;

        self.interact(&conn, |conn| {
            enable_foreign_keys(conn)?;
            // PRAGMA journal_mode returns a value, so we need to use query_row
            conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
            Ok(())
        })
        .await?;
        drop(conn);

        self.sessions.lock().clear();
        if let Some(previous) = self.pool.write().replace(pool) {
            previous.close();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.pool
            .read()
            .as_ref()
            .is_some_and(|pool| !pool.is_closed())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(pool) = self.pool.write().take() {
            pool.close();
        }
        // Connections returned to a closed pool are dropped, which rolls back
        // whatever they still had open
        self.sessions.lock().clear();
        Ok(())
    }

    async fn execute_with_params(
        &self,
        tx: Option<&TransactionHandle>,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<ExecResult> {
        let query = query.to_string();
        let params = params.to_vec();

        self.run(tx, move |conn| {
            let mut stmt = conn
                .prepare(&query)
                .map_err(|e| DatabaseError::prepare(query.as_str(), e))?;
            let affected = stmt
                .execute(params_from_iter(params.iter()))
                .map_err(|e| DatabaseError::exec(query.as_str(), e))?;

            Ok(ExecResult {
                rows_affected: affected as u64,
                last_insert_id: Some(conn.last_insert_rowid()).filter(|id| *id != 0),
            })
        })
        .await
    }

    async fn query_with_params(
        &self,
        tx: Option<&TransactionHandle>,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        let query = query.to_string();
        let params = params.to_vec();

        self.run(tx, move |conn| {
            let mut stmt = conn
                .prepare(&query)
                .map_err(|e| DatabaseError::prepare(query.as_str(), e))?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), Self::row_to_database_row)
                .map_err(|e| DatabaseError::query(query.as_str(), e))?;

            rows.collect::<rusqlite::Result<DatabaseResult>>()
                .map_err(|e| DatabaseError::query(query.as_str(), e))
        })
        .await
    }

    async fn begin_transaction(&self, tx: &TransactionHandle) -> Result<()> {
        if let Some(name) = &tx.savepoint {
            let sql = format!("SAVEPOINT {}", name);
            return self.run(Some(tx), move |conn| run_batch(conn, &sql)).await;
        }

        let conn = self.acquire().await?;
        self.interact(&conn, |conn| {
            enable_foreign_keys(conn)?;
            run_batch(conn, "BEGIN TRANSACTION")
        })
        .await?;
        self.sessions.lock().insert(tx.key, Arc::new(conn));
        Ok(())
    }

    async fn commit(&self, tx: &TransactionHandle) -> Result<()> {
        if let Some(name) = &tx.savepoint {
            let sql = format!("RELEASE SAVEPOINT {}", name);
            return self.run(Some(tx), move |conn| run_batch(conn, &sql)).await;
        }

        let session = self.take_session(tx)?;
        let result = self
            .interact(&session, |conn| run_batch(conn, "COMMIT"))
            .await;
        if result.is_err() {
            self.discard(&session, tx.key).await;
        }
        result
    }

    async fn rollback(&self, tx: &TransactionHandle) -> Result<()> {
        if let Some(name) = &tx.savepoint {
            let sql = format!("ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}", name);
            return self.run(Some(tx), move |conn| run_batch(conn, &sql)).await;
        }

        let session = self.take_session(tx)?;
        self.interact(&session, |conn| run_batch(conn, "ROLLBACK"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(key: TransactionKey) -> TransactionHandle {
        TransactionHandle {
            key,
            root: key,
            savepoint: None,
        }
    }

    fn nested(key: TransactionKey, parent: &TransactionHandle) -> TransactionHandle {
        TransactionHandle {
            key,
            root: parent.root,
            savepoint: Some(format!("sp_{}", key)),
        }
    }

    async fn with_table() -> Result<SqliteDatabase> {
        let db = SqliteDatabase::new();
        db.connect(":memory:").await?;
        db.execute("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .await?;
        Ok(db)
    }

    async fn count(db: &SqliteDatabase) -> Result<i64> {
        let rows = db.query("SELECT COUNT(*) AS n FROM test").await?;
        Ok(rows[0]["n"].as_long().unwrap_or_default())
    }

    #[tokio::test]
    async fn test_sqlite_connect() {
        let db = SqliteDatabase::new();
        assert!(db.connect(":memory:").await.is_ok());
        assert!(db.is_connected());
        assert!(db.disconnect().await.is_ok());
        assert!(!db.is_connected());
    }

    #[tokio::test]
    async fn test_not_connected() {
        let db = SqliteDatabase::new();
        let err = db.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err, DatabaseError::ConnectionError(_)));
    }

    #[tokio::test]
    async fn test_memory_databases_are_separate() -> Result<()> {
        let first = with_table().await?;
        let second = SqliteDatabase::new();
        second.connect(":memory:").await?;

        first.execute("INSERT INTO test (name) VALUES ('Alice')").await?;
        assert_eq!(count(&first).await?, 1);
        assert!(second.query("SELECT * FROM test").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_execute_reports_last_insert_id() -> Result<()> {
        let db = with_table().await?;

        let result = db
            .execute_with_params(
                None,
                "INSERT INTO test (name) VALUES (?)",
                &[DatabaseValue::from("Alice")],
            )
            .await?;
        assert_eq!(result.rows_affected, 1);
        assert_eq!(result.last_insert_id, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn test_query_keeps_column_order() -> Result<()> {
        let db = SqliteDatabase::new();
        db.connect(":memory:").await?;

        let rows = db
            .query_with_params(
                None,
                "SELECT ? AS zeta, ? AS alpha, NULL AS nothing",
                &[DatabaseValue::Long(1), DatabaseValue::from("a")],
            )
            .await?;
        assert_eq!(rows.len(), 1);
        let columns: Vec<&str> = rows[0].keys().map(String::as_str).collect();
        assert_eq!(columns, ["zeta", "alpha", "nothing"]);
        assert_eq!(rows[0]["nothing"], DatabaseValue::Null);
        Ok(())
    }

    #[tokio::test]
    async fn test_errors_carry_sql() -> Result<()> {
        let db = SqliteDatabase::new();
        db.connect(":memory:").await?;

        match db.query("SELECT * FROM missing").await {
            Err(DatabaseError::Prepare { sql, .. }) => assert_eq!(sql, "SELECT * FROM missing"),
            other => panic!("expected prepare error, got {:?}", other),
        }

        db.execute("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .await?;
        let err = db
            .execute_with_params(
                None,
                "INSERT INTO test (name) VALUES (?)",
                &[DatabaseValue::Null],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Exec { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_transaction() -> Result<()> {
        let db = with_table().await?;

        let outer = root(1);
        db.begin_transaction(&outer).await?;
        assert!(db.in_transaction());
        db.execute_with_params(Some(&outer), "INSERT INTO test (name) VALUES ('Alice')", &[])
            .await?;

        let inner = nested(2, &outer);
        db.begin_transaction(&inner).await?;
        db.execute_with_params(Some(&inner), "INSERT INTO test (name) VALUES ('Bob')", &[])
            .await?;
        db.rollback(&inner).await?;

        db.commit(&outer).await?;
        assert!(!db.in_transaction());

        let results = db.query("SELECT name FROM test").await?;
        assert_eq!(results.len(), 1); // Bob was rolled back with the savepoint
        assert_eq!(results[0]["name"].as_string(), "Alice");

        Ok(())
    }

    #[tokio::test]
    async fn test_untransacted_write_survives_foreign_rollback() -> Result<()> {
        let db = with_table().await?;

        let open = root(1);
        db.begin_transaction(&open).await?;
        db.execute_with_params(None, "INSERT INTO test (name) VALUES ('Outside')", &[])
            .await?;
        db.rollback(&open).await?;

        assert_eq!(count(&db).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_independent_roots_get_their_own_sessions() -> Result<()> {
        let db = with_table().await?;

        let a = root(1);
        let b = root(2);
        db.begin_transaction(&a).await?;
        db.begin_transaction(&b).await?;
        db.execute_with_params(Some(&b), "INSERT INTO test (name) VALUES ('B')", &[])
            .await?;

        db.commit(&a).await?;
        assert!(db.in_transaction());
        db.rollback(&b).await?;
        assert!(!db.in_transaction());

        assert_eq!(count(&db).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_finished_root_has_no_session() -> Result<()> {
        let db = with_table().await?;
        let tx = root(1);
        db.begin_transaction(&tx).await?;
        db.commit(&tx).await?;

        assert!(matches!(
            db.query_with_params(Some(&tx), "SELECT 1", &[]).await,
            Err(DatabaseError::TransactionError(_))
        ));
        assert!(matches!(
            db.rollback(&tx).await,
            Err(DatabaseError::TransactionError(_))
        ));
        Ok(())
    }
}
