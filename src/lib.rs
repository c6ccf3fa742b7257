//! # Rust ORM System
//!
//! An async object-relational mapping engine. Plain structs describe their
//! columns and associations once; the engine derives table metadata, builds
//! dialect-aware parameterized SQL, converts rows back into typed structs and
//! resolves one-to-one and one-to-many associations with batched eager loading
//! and cascading writes.
//!
//! ## Features
//!
//! - **Dialects**: MySQL, SQL Server and SQLite quoting, pagination and
//!   identity retrieval
//! - **Parameter binding**: values are only ever sent as positional parameters
//! - **Eager loading**: one query per association regardless of parent count
//! - **Nested transactions**: per-connection key bookkeeping mapped onto
//!   savepoints, with the active transaction carried explicitly by a [`Context`]
//! - **Async**: Tokio throughout, with a bundled SQLite backend
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rust_orm_system::prelude::*;
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Default)]
//! struct Author {
//!     id: i64,
//!     name: String,
//! }
//!
//! impl Entity for Author {
//!     const TYPE_NAME: &'static str = "Author";
//!
//!     fn define(schema: &mut SchemaBuilder<Self>) {
//!         schema.field("Id", |a| &a.id, |a| &mut a.id).db("id");
//!         schema.field("Name", |a| &a.name, |a| &mut a.name).db("name");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let registry = Arc::new(Registry::new());
//!     registry.connect_sqlite(&ConnectionConfig::sqlite(":memory:")).await?;
//!     let ctx = Context::new(registry);
//!
//!     ctx.exec_raw("CREATE TABLE author (id INTEGER PRIMARY KEY, name TEXT)", &[])
//!         .await?;
//!
//!     let mut author = Author { id: 0, name: "Ursula".to_string() };
//!     ctx.model::<Author>().create(&mut author).await?;
//!
//!     let mut found = Author::default();
//!     ctx.model::<Author>()
//!         .where_eq("Id", author.id)
//!         .find(&mut found)
//!         .await?;
//!     assert_eq!(found.name, "Ursula");
//!     Ok(())
//! }
//! ```
//!
//! ## Project Structure
//!
//! ```text
//! src/
//! ├── core/        # values, codec, dialects, filters, query builder,
//! │                # transaction stack, driver trait, errors
//! ├── backends/    # driver implementations (SQLite)
//! └── orm/         # schema, model, relation resolver, context, registry
//! ```

/// Core types: values, codec, SQL generation and the driver trait
pub mod core;

/// Database backend implementations
pub mod backends;

/// Schema reflection, models, associations and transactions
pub mod orm;

/// Prelude for convenient imports
///
/// ```rust
/// use rust_orm_system::prelude::*;
///
/// let dialect: Dialect = "sqlite3".parse().unwrap();
/// assert_eq!(dialect, Dialect::Sqlite);
/// ```
pub mod prelude {
    pub use crate::core::{
        ColumnValue, Connective, DataKind, Database, DatabaseError, DatabaseResult, DatabaseRow,
        DatabaseValue, Dialect, ExecResult, FilterValue, Operator, QueryBuilder, Result,
        TransactionKey,
    };
    pub use crate::orm::{
        Collection, Connection, ConnectionConfig, Context, Entity, EventPayload, Model, Registry,
        Schema, SchemaBuilder,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::backends::SqliteDatabase;
}

// Re-export at root level for convenience
pub use crate::core::{
    Database, DatabaseError, DatabaseResult, DatabaseRow, DatabaseValue, Dialect, Result,
};
pub use crate::orm::{Context, Entity, Model, Registry, Schema, SchemaBuilder};

#[cfg(feature = "sqlite")]
pub use backends::SqliteDatabase;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_imports() {
        use prelude::*;

        let op: Operator = "not in".parse().unwrap();
        assert_eq!(op, Operator::NotIn);
        assert_eq!(Dialect::default(), Dialect::Sqlite);
    }

    #[test]
    fn test_value_conversions() {
        use prelude::*;

        let val: DatabaseValue = 42.into();
        assert_eq!(val.as_int(), Some(42));

        let val: DatabaseValue = "test".into();
        assert_eq!(val.as_string(), "test");

        let val: DatabaseValue = true.into();
        assert_eq!(val.as_bool(), Some(true));
    }
}
