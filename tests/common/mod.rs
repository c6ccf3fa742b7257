//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use rust_orm_system::core::{
    Database, DatabaseResult, DatabaseRow, DatabaseValue, Dialect, ExecResult, Result,
    TransactionHandle,
};
use rust_orm_system::orm::{Connection, Context, Entity, Registry, SchemaBuilder};
use rust_orm_system::SqliteDatabase;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Author {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub rating: f64,
    pub active: bool,
    pub joined_at: Option<NaiveDateTime>,
    pub books: Vec<Book>,
    pub profile: Option<Profile>,
}

impl Entity for Author {
    const TYPE_NAME: &'static str = "Author";

    fn define(schema: &mut SchemaBuilder<Self>) {
        schema.field("Id", |a| &a.id, |a| &mut a.id).db("id");
        schema.field("Name", |a| &a.name, |a| &mut a.name).db("name");
        schema.field("Email", |a| &a.email, |a| &mut a.email).db("email");
        schema.field("Rating", |a| &a.rating, |a| &mut a.rating).db("rating");
        schema.field("Active", |a| &a.active, |a| &mut a.active).db("active");
        schema
            .field("JoinedAt", |a| &a.joined_at, |a| &mut a.joined_at)
            .db("joined_at");
        schema
            .has_many("Books", |a| &a.books, |a| &mut a.books)
            .fk("AuthorId");
        schema
            .has_one("Profile", |a| &a.profile, |a| &mut a.profile)
            .fk("AuthorId");
    }
}

impl Author {
    pub fn named(name: &str, rating: f64) -> Self {
        Self {
            name: name.to_string(),
            rating,
            active: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Book {
    pub id: i64,
    pub author_id: i64,
    pub title: String,
    pub pages: i32,
}

impl Entity for Book {
    const TYPE_NAME: &'static str = "Book";

    fn define(schema: &mut SchemaBuilder<Self>) {
        schema.field("Id", |b| &b.id, |b| &mut b.id).db("id");
        schema
            .field("AuthorId", |b| &b.author_id, |b| &mut b.author_id)
            .db("author_id");
        schema.field("Title", |b| &b.title, |b| &mut b.title).db("title");
        schema.field("Pages", |b| &b.pages, |b| &mut b.pages).db("pages");
    }
}

impl Book {
    pub fn new(author_id: i64, title: &str, pages: i32) -> Self {
        Self {
            id: 0,
            author_id,
            title: title.to_string(),
            pages,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub id: i64,
    pub author_id: i64,
    pub bio: String,
}

impl Entity for Profile {
    const TYPE_NAME: &'static str = "Profile";

    fn define(schema: &mut SchemaBuilder<Self>) {
        schema.field("Id", |p| &p.id, |p| &mut p.id).db("id");
        schema
            .field("AuthorId", |p| &p.author_id, |p| &mut p.author_id)
            .db("author_id");
        schema.field("Bio", |p| &p.bio, |p| &mut p.bio).db("bio");
    }

    fn table_name() -> Option<String> {
        Some("author_profile".to_string())
    }
}

pub const SCHEMA: &str = "
    CREATE TABLE {prefix}author (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT,
        rating REAL NOT NULL DEFAULT 0,
        active INTEGER NOT NULL DEFAULT 0,
        joined_at TEXT
    );
    CREATE TABLE {prefix}book (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        author_id INTEGER NOT NULL,
        title TEXT NOT NULL,
        pages INTEGER NOT NULL
    );
    CREATE TABLE {prefix}author_profile (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        author_id INTEGER NOT NULL,
        bio TEXT NOT NULL
    );
";

/// SQLite driver that records every statement it is asked to run
pub struct CountingDatabase {
    inner: SqliteDatabase,
    statements: Mutex<Vec<String>>,
}

impl CountingDatabase {
    pub fn new() -> Self {
        Self {
            inner: SqliteDatabase::new(),
            statements: Mutex::new(Vec::new()),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.statements
            .lock()
            .iter()
            .filter(|sql| sql.contains(needle))
            .count()
    }

    pub fn clear(&self) {
        self.statements.lock().clear();
    }

    fn record(&self, sql: &str) {
        self.statements.lock().push(sql.to_string());
    }
}

#[async_trait]
impl Database for CountingDatabase {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    async fn connect(&self, connection_string: &str) -> Result<()> {
        self.inner.connect(connection_string).await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect().await
    }

    async fn execute_with_params(
        &self,
        tx: Option<&TransactionHandle>,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<ExecResult> {
        self.record(query);
        self.inner.execute_with_params(tx, query, params).await
    }

    async fn query_with_params(
        &self,
        tx: Option<&TransactionHandle>,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        self.record(query);
        self.inner.query_with_params(tx, query, params).await
    }

    async fn begin_transaction(&self, tx: &TransactionHandle) -> Result<()> {
        self.inner.begin_transaction(tx).await
    }

    async fn commit(&self, tx: &TransactionHandle) -> Result<()> {
        self.inner.commit(tx).await
    }

    async fn rollback(&self, tx: &TransactionHandle) -> Result<()> {
        self.inner.rollback(tx).await
    }
}

/// In-memory SQLite with the test tables, registered as the default connection
pub async fn sqlite_context(prefix: &str) -> Result<(Context, Arc<CountingDatabase>)> {
    let database = Arc::new(CountingDatabase::new());
    database.connect(":memory:").await?;
    for statement in SCHEMA.replace("{prefix}", prefix).split(';') {
        if !statement.trim().is_empty() {
            database.inner.execute(statement).await?;
        }
    }

    let registry = Arc::new(Registry::new());
    registry.register(Connection::new("default", database.clone()).with_prefix(prefix));
    Ok((Context::new(registry), database))
}

/// SQL Server stand-in: records statements and answers from a script
pub struct RecordingDatabase {
    pub identity: i64,
    statements: Mutex<Vec<(String, Vec<DatabaseValue>)>>,
    responses: Mutex<VecDeque<DatabaseResult>>,
}

impl RecordingDatabase {
    pub fn new(identity: i64) -> Self {
        Self {
            identity,
            statements: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
        }
    }

    /// Rows returned by the next plain query
    pub fn push_response(&self, rows: DatabaseResult) {
        self.responses.lock().push_back(rows);
    }

    pub fn statements(&self) -> Vec<(String, Vec<DatabaseValue>)> {
        self.statements.lock().clone()
    }

    fn record(&self, sql: &str, params: &[DatabaseValue]) {
        self.statements
            .lock()
            .push((sql.to_string(), params.to_vec()));
    }
}

#[async_trait]
impl Database for RecordingDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Mssql
    }

    async fn connect(&self, _connection_string: &str) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn execute_with_params(
        &self,
        _tx: Option<&TransactionHandle>,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<ExecResult> {
        self.record(query, params);
        Ok(ExecResult {
            rows_affected: 1,
            last_insert_id: None,
        })
    }

    async fn query_with_params(
        &self,
        _tx: Option<&TransactionHandle>,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        self.record(query, params);
        if query.contains("SCOPE_IDENTITY()") {
            let mut row = DatabaseRow::new();
            row.insert("ID".to_string(), DatabaseValue::Long(self.identity));
            return Ok(vec![row]);
        }
        Ok(self.responses.lock().pop_front().unwrap_or_default())
    }

    async fn begin_transaction(&self, tx: &TransactionHandle) -> Result<()> {
        self.record(&format!("BEGIN {:?}", tx.savepoint), &[]);
        Ok(())
    }

    async fn commit(&self, tx: &TransactionHandle) -> Result<()> {
        self.record(&format!("COMMIT {:?}", tx.savepoint), &[]);
        Ok(())
    }

    async fn rollback(&self, tx: &TransactionHandle) -> Result<()> {
        self.record(&format!("ROLLBACK {:?}", tx.savepoint), &[]);
        Ok(())
    }
}

/// Context whose default connection is a [`RecordingDatabase`]
pub fn mssql_context(identity: i64, prefix: &str) -> (Context, Arc<RecordingDatabase>) {
    let database = Arc::new(RecordingDatabase::new(identity));
    let registry = Arc::new(Registry::new());
    registry.register(Connection::new("default", database.clone()).with_prefix(prefix));
    (Context::new(registry), database)
}
