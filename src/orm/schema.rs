//! Schema reflection
//!
//! Rust has no runtime struct reflection, so an entity describes itself once
//! through [`Entity::define`]. The resulting [`Schema`] is built on first use
//! and cached for the lifetime of the process.
//!
//! ```ignore
//! #[derive(Debug, Clone, Default)]
//! struct Author {
//!     id: i64,
//!     name: String,
//!     books: Vec<Book>,
//! }
//!
//! impl Entity for Author {
//!     const TYPE_NAME: &'static str = "Author";
//!
//!     fn define(schema: &mut SchemaBuilder<Self>) {
//!         schema.field("Id", |a| &a.id, |a| &mut a.id).db("id");
//!         schema.field("Name", |a| &a.name, |a| &mut a.name).db("name");
//!         schema.has_many("Books", |a| &a.books, |a| &mut a.books).fk("AuthorId");
//!     }
//! }
//! ```

use crate::core::codec::{ColumnValue, DataKind};
use crate::core::error::Result;
use crate::core::query_builder::ColumnLookup;
use crate::core::value::{DatabaseRow, DatabaseValue};
use crate::orm::relation::{AssociationOps, HasMany, HasOne};
use heck::ToSnakeCase;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// A struct type mapped onto a table
pub trait Entity: Default + Clone + Send + Sync + 'static {
    /// Type name used to derive the table name
    const TYPE_NAME: &'static str;

    /// Register fields and associations in declaration order
    fn define(schema: &mut SchemaBuilder<Self>);

    /// Explicit table name; `None` derives it from [`TYPE_NAME`](Self::TYPE_NAME)
    fn table_name() -> Option<String> {
        None
    }

    /// Field name of the primary key
    fn primary_key() -> &'static str {
        "Id"
    }
}

/// Typed read/write of one column field
pub(crate) trait FieldAccess<E>: Send + Sync {
    fn get(&self, entity: &E) -> DatabaseValue;
    fn set(&self, entity: &mut E, raw: &DatabaseValue) -> Result<()>;
}

struct ScalarAccess<E, T> {
    get: fn(&E) -> &T,
    get_mut: fn(&mut E) -> &mut T,
}

impl<E: 'static, T: ColumnValue> FieldAccess<E> for ScalarAccess<E, T> {
    fn get(&self, entity: &E) -> DatabaseValue {
        (self.get)(entity).produce()
    }

    fn set(&self, entity: &mut E, raw: &DatabaseValue) -> Result<()> {
        *(self.get_mut)(entity) = T::scan(raw)?;
        Ok(())
    }
}

/// Singular or collection association
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    Singular,
    Collection,
}

/// Mapping metadata for one struct member
pub struct Field<E> {
    pub name: String,
    pub column: String,
    pub kind: DataKind,
    pub declared_type: &'static str,
    pub base_type: &'static str,
    pub pk_tag: Option<String>,
    pub fk_tag: Option<String>,
    access: Option<Box<dyn FieldAccess<E>>>,
}

impl<E: Entity> Field<E> {
    pub fn is_column(&self) -> bool {
        self.kind.is_column()
    }

    /// Parent field whose value is matched against the foreign key
    pub fn primary_name<'a>(&'a self, schema: &'a Schema<E>) -> &'a str {
        self.pk_tag.as_deref().unwrap_or(&schema.primary_key)
    }

    /// Foreign key field on the associated type
    pub fn foreign_name(&self, schema: &Schema<E>) -> String {
        self.fk_tag
            .clone()
            .unwrap_or_else(|| format!("{}{}", self.name, schema.primary_key))
    }
}

impl<E> std::fmt::Debug for Field<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("kind", &self.kind)
            .field("declared_type", &self.declared_type)
            .finish_non_exhaustive()
    }
}

/// A member holding related rows instead of a column
pub struct Association<E: Entity> {
    pub name: String,
    pub field: usize,
    pub kind: AssociationKind,
    pub target: &'static str,
    pub(crate) ops: Box<dyn AssociationOps<E>>,
}

/// Tag-style options for the field just registered
pub struct FieldOptions<'a, E> {
    field: &'a mut Field<E>,
}

impl<E> FieldOptions<'_, E> {
    /// Column name, when it differs from the field name
    pub fn db(self, column: &str) -> Self {
        self.field.column = column.to_string();
        self
    }

    /// Parent field an association is keyed on
    pub fn pk(self, name: &str) -> Self {
        self.field.pk_tag = Some(name.to_string());
        self
    }

    /// Foreign key field on the associated type
    pub fn fk(self, name: &str) -> Self {
        self.field.fk_tag = Some(name.to_string());
        self
    }
}

/// Collects field and association registrations for [`Entity::define`]
pub struct SchemaBuilder<E: Entity> {
    fields: Vec<Field<E>>,
    associations: Vec<Association<E>>,
}

impl<E: Entity> SchemaBuilder<E> {
    fn new() -> Self {
        Self {
            fields: Vec::new(),
            associations: Vec::new(),
        }
    }

    /// Register a column field
    pub fn field<T: ColumnValue>(
        &mut self,
        name: &str,
        get: fn(&E) -> &T,
        get_mut: fn(&mut E) -> &mut T,
    ) -> FieldOptions<'_, E> {
        self.push_field(Field {
            name: name.to_string(),
            column: name.to_string(),
            kind: T::KIND,
            declared_type: type_name::<T>(),
            base_type: T::base_type_name(),
            pk_tag: None,
            fk_tag: None,
            access: Some(Box::new(ScalarAccess { get, get_mut })),
        })
    }

    /// Register a singular association
    pub fn has_one<C: Entity>(
        &mut self,
        name: &str,
        get: fn(&E) -> &Option<C>,
        get_mut: fn(&mut E) -> &mut Option<C>,
    ) -> FieldOptions<'_, E> {
        self.push_association::<Option<C>, C>(
            name,
            AssociationKind::Singular,
            Box::new(HasOne { get, get_mut }),
        )
    }

    /// Register a collection association
    pub fn has_many<C: Entity>(
        &mut self,
        name: &str,
        get: fn(&E) -> &Vec<C>,
        get_mut: fn(&mut E) -> &mut Vec<C>,
    ) -> FieldOptions<'_, E> {
        self.push_association::<Vec<C>, C>(
            name,
            AssociationKind::Collection,
            Box::new(HasMany { get, get_mut }),
        )
    }

    fn push_association<D, C: Entity>(
        &mut self,
        name: &str,
        kind: AssociationKind,
        ops: Box<dyn AssociationOps<E>>,
    ) -> FieldOptions<'_, E> {
        self.associations.push(Association {
            name: name.to_string(),
            field: self.fields.len(),
            kind,
            target: C::TYPE_NAME,
            ops,
        });
        self.push_field(Field {
            name: name.to_string(),
            column: name.to_string(),
            kind: DataKind::None,
            declared_type: type_name::<D>(),
            base_type: type_name::<C>(),
            pk_tag: None,
            fk_tag: None,
            access: None,
        })
    }

    fn push_field(&mut self, field: Field<E>) -> FieldOptions<'_, E> {
        self.fields.push(field);
        let last = self.fields.len() - 1;
        FieldOptions {
            field: &mut self.fields[last],
        }
    }
}

/// Table, column and association metadata for one entity type
pub struct Schema<E: Entity> {
    type_name: &'static str,
    table_name: String,
    primary_key: String,
    fields: Vec<Field<E>>,
    field_index: HashMap<String, usize>,
    column_index: HashMap<String, usize>,
    associations: IndexMap<String, Association<E>>,
}

type SchemaCache = RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>;

static SCHEMAS: OnceLock<SchemaCache> = OnceLock::new();

impl<E: Entity> Schema<E> {
    /// Cached schema for `E`, built on first use
    pub fn reflect() -> Arc<Self> {
        let cache = SCHEMAS.get_or_init(Default::default);
        let cached = cache.read().get(&TypeId::of::<E>()).cloned();
        if let Some(schema) = cached.and_then(|s| s.downcast::<Self>().ok()) {
            return schema;
        }

        // Built outside the lock; a concurrent build of the same type is harmless
        let built = Arc::new(Self::build());
        let stored = cache
            .write()
            .entry(TypeId::of::<E>())
            .or_insert_with(|| built.clone() as Arc<dyn Any + Send + Sync>)
            .clone();
        stored.downcast::<Self>().unwrap_or(built)
    }

    fn build() -> Self {
        let mut builder = SchemaBuilder::new();
        E::define(&mut builder);

        let table_name = E::table_name().unwrap_or_else(|| E::TYPE_NAME.to_snake_case());
        let mut field_index = HashMap::new();
        let mut column_index = HashMap::new();
        for (i, field) in builder.fields.iter().enumerate() {
            field_index.insert(field.name.clone(), i);
            if field.is_column() {
                column_index.insert(field.column.clone(), i);
            }
        }
        let associations = builder
            .associations
            .into_iter()
            .map(|a| (a.name.clone(), a))
            .collect();

        Self {
            type_name: E::TYPE_NAME,
            table_name,
            primary_key: E::primary_key().to_string(),
            fields: builder.fields,
            field_index,
            column_index,
            associations,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn fields(&self) -> &[Field<E>] {
        &self.fields
    }

    /// Field by name
    pub fn field(&self, name: &str) -> Option<&Field<E>> {
        self.field_index.get(name).map(|i| &self.fields[*i])
    }

    /// Column field by column name
    pub fn field_by_column(&self, column: &str) -> Option<&Field<E>> {
        self.column_index.get(column).map(|i| &self.fields[*i])
    }

    pub fn associations(&self) -> impl Iterator<Item = &Association<E>> {
        self.associations.values()
    }

    pub fn association(&self, name: &str) -> Option<&Association<E>> {
        self.associations.get(name)
    }

    /// Field owning an association
    pub fn association_field(&self, association: &Association<E>) -> &Field<E> {
        &self.fields[association.field]
    }

    pub fn column_name_to_field_name(&self, column: &str) -> Option<&str> {
        self.field_by_column(column).map(|f| f.name.as_str())
    }

    pub fn field_name_to_column_name(&self, name: &str) -> Option<&str> {
        self.field(name)
            .filter(|f| f.is_column())
            .map(|f| f.column.as_str())
    }

    /// Read a field by field or column name. Unknown names and associations
    /// yield `None`.
    pub fn get_value(&self, entity: &E, name: &str) -> Option<DatabaseValue> {
        self.field(name)
            .or_else(|| self.field_by_column(name))
            .and_then(|f| f.access.as_ref())
            .map(|access| access.get(entity))
    }

    /// Write a field from a raw value. Unknown names are ignored so that
    /// aggregate pseudo-columns pass through harmlessly.
    pub fn set_value(&self, entity: &mut E, name: &str, raw: &DatabaseValue) -> Result<()> {
        let field = self.field(name).or_else(|| self.field_by_column(name));
        match field.and_then(|f| f.access.as_ref()) {
            Some(access) => access.set(entity, raw),
            None => Ok(()),
        }
    }

    /// Assign every known column of `row` onto `entity`
    pub fn apply_row(&self, entity: &mut E, row: &DatabaseRow) -> Result<()> {
        for (column, raw) in row {
            if let Some(access) = self.field_by_column(column).and_then(|f| f.access.as_ref()) {
                access.set(entity, raw)?;
            }
        }
        Ok(())
    }

    /// Materialize `row` as a new element of `rows`
    pub fn append_row(&self, rows: &mut Vec<E>, row: &DatabaseRow) -> Result<()> {
        let mut entity = E::default();
        self.apply_row(&mut entity, row)?;
        rows.push(entity);
        Ok(())
    }

    /// `(field, value)` for every column field, in declaration order
    pub fn column_values(&self, entity: &E) -> Vec<(String, DatabaseValue)> {
        self.fields
            .iter()
            .filter_map(|f| f.access.as_ref().map(|a| (f.name.clone(), a.get(entity))))
            .collect()
    }

    pub fn primary_value(&self, entity: &E) -> Option<DatabaseValue> {
        self.get_value(entity, &self.primary_key)
    }

    /// Whether the primary key is filled in by the database on insert
    pub fn has_generated_key(&self) -> bool {
        self.field(&self.primary_key)
            .map(|f| matches!(f.kind, DataKind::Int | DataKind::Uint))
            .unwrap_or(false)
    }
}

impl<E: Entity> ColumnLookup for Schema<E> {
    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn primary_key(&self) -> &str {
        &self.primary_key
    }

    fn column_name(&self, field: &str) -> String {
        self.field_name_to_column_name(field)
            .unwrap_or(field)
            .to_string()
    }

    fn mapped_columns(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .filter(|f| f.is_column())
            .map(|f| (f.name.clone(), f.column.clone()))
            .collect()
    }

    fn is_association(&self, field: &str) -> bool {
        self.associations.contains_key(field)
    }
}

impl<E: Entity> std::fmt::Debug for Schema<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("type_name", &self.type_name)
            .field("table_name", &self.table_name)
            .field("primary_key", &self.primary_key)
            .field("fields", &self.fields)
            .field("associations", &self.associations.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Comment {
        id: i64,
        blog_post_id: i64,
        body: String,
    }

    impl Entity for Comment {
        const TYPE_NAME: &'static str = "Comment";

        fn define(schema: &mut SchemaBuilder<Self>) {
            schema.field("Id", |c| &c.id, |c| &mut c.id);
            schema.field("BlogPostId", |c| &c.blog_post_id, |c| &mut c.blog_post_id);
            schema.field("Body", |c| &c.body, |c| &mut c.body);
        }
    }

    #[derive(Debug, Clone, Default)]
    struct BlogPost {
        id: i64,
        title: String,
        published_at: Option<NaiveDateTime>,
        comments: Vec<Comment>,
        pinned: Option<Comment>,
    }

    impl Entity for BlogPost {
        const TYPE_NAME: &'static str = "BlogPost";

        fn define(schema: &mut SchemaBuilder<Self>) {
            schema.field("Id", |p| &p.id, |p| &mut p.id).db("id");
            schema.field("Title", |p| &p.title, |p| &mut p.title).db("title");
            schema.field("PublishedAt", |p| &p.published_at, |p| &mut p.published_at);
            schema.has_many("Comments", |p| &p.comments, |p| &mut p.comments);
            schema
                .has_one("Pinned", |p| &p.pinned, |p| &mut p.pinned)
                .pk("Id")
                .fk("BlogPostId");
        }
    }

    #[test]
    fn test_reflect_metadata() {
        let schema = Schema::<BlogPost>::reflect();
        assert_eq!(schema.table_name(), "blog_post");
        assert_eq!(schema.primary_key(), "Id");
        assert_eq!(schema.fields().len(), 5);

        let published = schema.field("PublishedAt").unwrap();
        assert_eq!(published.kind, DataKind::Time);
        assert_eq!(published.base_type, type_name::<NaiveDateTime>());
        assert_eq!(published.column, "PublishedAt");

        let comments = schema.association("Comments").unwrap();
        assert_eq!(comments.kind, AssociationKind::Collection);
        assert_eq!(comments.target, "Comment");
        let field = schema.association_field(comments);
        assert_eq!(field.kind, DataKind::None);
        assert_eq!(field.foreign_name(&schema), "CommentsId");

        let pinned = schema.association("Pinned").unwrap();
        assert_eq!(pinned.kind, AssociationKind::Singular);
        assert_eq!(schema.association_field(pinned).foreign_name(&schema), "BlogPostId");
    }

    #[test]
    fn test_reflect_is_cached() {
        let a = Schema::<Comment>::reflect();
        let b = Schema::<Comment>::reflect();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_name_translation() {
        let schema = Schema::<BlogPost>::reflect();
        assert_eq!(schema.field_name_to_column_name("Title"), Some("title"));
        assert_eq!(schema.column_name_to_field_name("title"), Some("Title"));
        assert_eq!(schema.field_name_to_column_name("Comments"), None);
        assert_eq!(schema.column_name("Unknown"), "Unknown");

        let mapped: Vec<String> = schema.mapped_columns().into_iter().map(|(_, c)| c).collect();
        assert_eq!(mapped, ["id", "title", "PublishedAt"]);
    }

    #[test]
    fn test_get_and_set_value() {
        let schema = Schema::<BlogPost>::reflect();
        let mut post = BlogPost::default();

        schema
            .set_value(&mut post, "Title", &DatabaseValue::Bytes(b"hello".to_vec()))
            .unwrap();
        schema.set_value(&mut post, "id", &DatabaseValue::from("12")).unwrap();
        schema
            .set_value(&mut post, "__COUNT__", &DatabaseValue::Long(3))
            .unwrap();

        assert_eq!(post.title, "hello");
        assert_eq!(post.id, 12);
        assert_eq!(schema.get_value(&post, "Id"), Some(DatabaseValue::Long(12)));
        assert_eq!(schema.get_value(&post, "PublishedAt"), Some(DatabaseValue::Null));
        assert_eq!(schema.get_value(&post, "Comments"), None);
        assert_eq!(schema.get_value(&post, "Nope"), None);
    }

    #[test]
    fn test_append_row_ignores_unknown_columns() {
        let schema = Schema::<Comment>::reflect();
        let mut row = DatabaseRow::new();
        row.insert("Id".to_string(), DatabaseValue::Long(1));
        row.insert("Body".to_string(), DatabaseValue::from("first"));
        row.insert("extra".to_string(), DatabaseValue::from("ignored"));

        let mut rows = Vec::new();
        schema.append_row(&mut rows, &row).unwrap();
        schema.append_row(&mut rows, &row).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            Comment {
                id: 1,
                blog_post_id: 0,
                body: "first".to_string()
            }
        );
    }

    #[test]
    fn test_null_into_integer_field_fails() {
        let schema = Schema::<Comment>::reflect();
        let mut row = DatabaseRow::new();
        row.insert("BlogPostId".to_string(), DatabaseValue::Null);
        let mut comment = Comment::default();
        assert!(schema.apply_row(&mut comment, &row).is_err());
    }

    #[test]
    fn test_column_values_skip_associations() {
        let schema = Schema::<BlogPost>::reflect();
        let names: Vec<String> = schema
            .column_values(&BlogPost::default())
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, ["Id", "Title", "PublishedAt"]);
        assert!(schema.has_generated_key());
    }
}
