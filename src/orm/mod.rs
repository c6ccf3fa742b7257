//! Object-relational mapping layer
//!
//! Entities describe themselves once ([`schema`]), operations are assembled
//! through a [`Model`] obtained from a [`Context`], and associations are
//! loaded or cascaded by the [`relation`] resolver.

pub mod collection;
pub mod config;
pub mod context;
pub mod events;
pub mod model;
pub mod registry;
pub mod relation;
pub mod schema;

pub use collection::Collection;
pub use config::ConnectionConfig;
pub use context::Context;
pub use events::{Action, Event, EventBus, EventCallback, EventPayload};
pub use model::Model;
pub use registry::{Connection, Registry};
pub use relation::{Configurator, WithRelation};
pub use schema::{Association, AssociationKind, Entity, Field, FieldOptions, Schema, SchemaBuilder};
