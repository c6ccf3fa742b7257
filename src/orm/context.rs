//! Operation context
//!
//! A [`Context`] is the explicit value every operation runs under: which
//! registry and connection to use, which transaction (if any) statements
//! belong to, the lifecycle hooks, and an optional per-statement deadline.
//! Contexts are cheap to clone; clones share the registry and hooks.

use crate::core::error::{DatabaseError, Result};
use crate::core::transaction::TransactionKey;
use crate::core::value::{DatabaseResult, DatabaseValue, ExecResult};
use crate::orm::events::{Action, Event, EventBus, EventPayload};
use crate::orm::model::Model;
use crate::orm::registry::{Connection, Registry};
use crate::orm::schema::Entity;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};

#[derive(Clone)]
pub struct Context {
    registry: Arc<Registry>,
    conn: Option<String>,
    transaction: Option<TransactionKey>,
    events: Arc<EventBus>,
    timeout: Option<Duration>,
}

impl Context {
    /// Context on the registry's default connection, outside any transaction
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            conn: None,
            transaction: None,
            events: Arc::new(EventBus::new()),
            timeout: None,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Same context on another named connection.
    ///
    /// Transaction keys belong to one connection, so the result runs outside
    /// any transaction.
    #[must_use]
    pub fn use_conn(&self, name: impl Into<String>) -> Self {
        Self {
            conn: Some(name.into()),
            transaction: None,
            ..self.clone()
        }
    }

    /// Bound every statement issued through this context by `timeout`
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self.clone()
        }
    }

    /// Same context with statements running inside transaction `key`
    #[must_use]
    pub fn in_transaction(&self, key: TransactionKey) -> Self {
        Self {
            transaction: Some(key),
            ..self.clone()
        }
    }

    pub fn transaction_key(&self) -> Option<TransactionKey> {
        self.transaction
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The connection this context resolves to
    pub fn connection(&self) -> Result<Arc<Connection>> {
        self.registry.get(self.conn.as_deref())
    }

    /// Start a fluent operation chain on `E`
    pub fn model<E: Entity>(&self) -> Model<'_, E> {
        Model::new(self)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn on_query_after<F>(&self, hook: F)
    where
        F: Fn(&EventPayload<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.events.on(Event::QueryAfter, Arc::new(hook));
    }

    pub fn on_insert_after<F>(&self, hook: F)
    where
        F: Fn(&EventPayload<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.events.on(Event::InsertAfter, Arc::new(hook));
    }

    pub fn on_update_after<F>(&self, hook: F)
    where
        F: Fn(&EventPayload<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.events.on(Event::UpdateAfter, Arc::new(hook));
    }

    pub fn on_delete_after<F>(&self, hook: F)
    where
        F: Fn(&EventPayload<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.events.on(Event::DeleteAfter, Arc::new(hook));
    }

    pub(crate) fn emit(&self, event: Event, action: Action, table: &str, rows: u64) -> Result<()> {
        self.events.emit(event, &EventPayload { action, table, rows })
    }

    async fn bounded<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .map_err(|_| DatabaseError::query_timeout(limit.as_millis() as u64))?,
            None => operation.await,
        }
    }

    pub(crate) async fn query_on(
        &self,
        conn: &Connection,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        self.bounded(conn.query(self.transaction, sql, params)).await
    }

    pub(crate) async fn execute_on(
        &self,
        conn: &Connection,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<ExecResult> {
        self.bounded(conn.execute(self.transaction, sql, params)).await
    }

    /// Run hand-written SQL returning rows, inside this context's transaction
    pub async fn query_raw(&self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        let conn = self.connection()?;
        self.query_on(&conn, sql, params).await
    }

    /// Run a hand-written statement, inside this context's transaction
    pub async fn exec_raw(&self, sql: &str, params: &[DatabaseValue]) -> Result<ExecResult> {
        let conn = self.connection()?;
        self.execute_on(&conn, sql, params).await
    }

    /// Open a transaction, nested inside this context's own when it has one
    pub async fn begin(&self) -> Result<TransactionKey> {
        self.connection()?.begin(self.transaction).await
    }

    pub async fn commit(&self, key: TransactionKey) -> Result<()> {
        self.connection()?.commit(key).await
    }

    pub async fn rollback(&self, key: TransactionKey) -> Result<()> {
        self.connection()?.rollback(key).await
    }

    /// Run `block` inside a new transaction.
    ///
    /// `Ok` commits and `Err` rolls back. A panic in `block` rolls back this
    /// transaction only and then resumes unwinding in the caller. When called
    /// on a context that is already inside a transaction the new one is
    /// nested; rolling it back leaves the outer transaction open. Dropping the
    /// returned future before it completes aborts `block` and rolls back.
    pub async fn transaction<F, Fut, T>(&self, block: F) -> Result<T>
    where
        F: FnOnce(Context) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let key = self.begin().await?;
        tracing::info!(key, nested = self.transaction.is_some(), "Beginning transaction");

        // Spawned so a panic surfaces as a JoinError instead of unwinding past
        // the rollback
        let mut guard = TransactionGuard {
            ctx: self.clone(),
            key,
            task: Some(tokio::spawn(block(self.in_transaction(key)))),
            armed: true,
        };
        let outcome = guard.join().await;

        match outcome {
            Ok(Ok(value)) => {
                let committed = self.commit(key).await;
                guard.disarm();
                committed.map(|()| value)
            }
            Ok(Err(err)) => {
                tracing::debug!(key, error = %err, "Transaction block failed, rolling back");
                if let Err(rollback) = self.rollback(key).await {
                    tracing::warn!(key, error = %rollback, "Rollback failed");
                }
                guard.disarm();
                Err(err)
            }
            Err(join) => {
                if let Err(rollback) = self.rollback(key).await {
                    tracing::warn!(key, error = %rollback, "Rollback after panic failed");
                }
                guard.disarm();
                if join.is_panic() {
                    std::panic::resume_unwind(join.into_panic());
                }
                Err(DatabaseError::transaction(format!(
                    "transaction block {} was cancelled",
                    key
                )))
            }
        }
    }
}

/// Owns a running transaction block until it has been committed or rolled
/// back. Dropped while still armed, it aborts the block and schedules the
/// rollback on the current runtime.
struct TransactionGuard<T: Send + 'static> {
    ctx: Context,
    key: TransactionKey,
    task: Option<JoinHandle<Result<T>>>,
    armed: bool,
}

impl<T: Send + 'static> TransactionGuard<T> {
    async fn join(&mut self) -> std::result::Result<Result<T>, JoinError> {
        let Some(task) = self.task.as_mut() else {
            return Ok(Err(DatabaseError::transaction(format!(
                "transaction block {} already joined",
                self.key
            ))));
        };
        let outcome = task.await;
        self.task = None;
        outcome
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<T: Send + 'static> Drop for TransactionGuard<T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let task = self.task.take();
        if let Some(task) = &task {
            task.abort();
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(key = self.key, "Transaction dropped outside a runtime, left open");
            return;
        };
        tracing::warn!(key = self.key, "Transaction dropped before completion, rolling back");
        let ctx = self.ctx.clone();
        let key = self.key;
        runtime.spawn(async move {
            // The block must have stopped before its statements are undone
            if let Some(task) = task {
                let _ = task.await;
            }
            if let Err(err) = ctx.rollback(key).await {
                tracing::warn!(key, error = %err, "Rollback of dropped transaction failed");
            }
        });
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("conn", &self.conn)
            .field("transaction", &self.transaction)
            .field("timeout", &self.timeout)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
