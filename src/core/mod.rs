//! Core database system types and traits
//!
//! This module provides the building blocks the ORM layer is made of: errors,
//! driver values and their codec, dialects, filters, the query builder, the
//! per-connection transaction stack and the driver trait.

pub mod codec;
pub mod database;
pub mod dialect;
pub mod error;
pub mod filter;
pub mod query_builder;
pub mod transaction;
pub mod value;

// Re-export commonly used types
pub use codec::{ColumnValue, DataKind};
pub use database::Database;
pub use dialect::{Dialect, IdentityRetrieval};
pub use error::{DatabaseError, Result};
pub use filter::{Connective, Expr, Filter, FilterValue, Operator};
pub use query_builder::{ColumnLookup, Operation, OrderDirection, QueryBuilder};
pub use transaction::{TransactionHandle, TransactionKey, TransactionStack};
pub use value::{DatabaseResult, DatabaseRow, DatabaseValue, ExecResult};
