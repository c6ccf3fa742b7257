//! Fluent operation chains
//!
//! A [`Model`] ties one cached schema to one query builder for a single call
//! chain. The chain ends with a terminal operation (`find`, `select`,
//! `create`, ...) which consumes the model.

use crate::core::codec::ColumnValue;
use crate::core::dialect::IdentityRetrieval;
use crate::core::error::{DatabaseError, Result};
use crate::core::filter::{Connective, FilterValue, Operator};
use crate::core::query_builder::{ColumnLookup, Operation, OrderDirection, QueryBuilder};
use crate::core::value::{DatabaseResult, DatabaseValue};
use crate::orm::collection::Collection;
use crate::orm::context::Context;
use crate::orm::events::{Action, Event};
use crate::orm::registry::Connection;
use crate::orm::relation::{self, CascadeAction, WithRelation};
use crate::orm::schema::{Entity, Schema};
use std::sync::Arc;

const COUNT_ALIAS: &str = "__COUNT__";
const VALUE_ALIAS: &str = "__VALUE__";

/// One fluent call chain over entity type `E`
pub struct Model<'a, E: Entity> {
    ctx: &'a Context,
    schema: Arc<Schema<E>>,
    builder: QueryBuilder,
    with_list: Vec<WithRelation>,
    cancel_together: Vec<String>,
}

impl<'a, E: Entity> Model<'a, E> {
    pub(crate) fn new(ctx: &'a Context) -> Self {
        let schema = Schema::<E>::reflect();
        let builder = QueryBuilder::new(schema.clone());
        Self {
            ctx,
            schema,
            builder,
            with_list: Vec::new(),
            cancel_together: Vec::new(),
        }
    }

    pub fn schema(&self) -> &Schema<E> {
        &self.schema
    }

    /// Select only these fields (comma separated)
    #[must_use]
    pub fn field(mut self, fields: &str) -> Self {
        self.builder.add_field(fields);
        self
    }

    #[must_use]
    pub fn field_raw(mut self, expr: impl Into<String>) -> Self {
        self.builder.add_field_raw(expr);
        self
    }

    /// Leave fields out of the projection and out of writes
    #[must_use]
    pub fn ignore_field(mut self, fields: &str) -> Self {
        self.builder.ignore_field(fields);
        self
    }

    #[must_use]
    pub fn where_eq(self, field: &str, value: impl Into<DatabaseValue>) -> Self {
        self.where_filter(Connective::And, field, Operator::Eq, FilterValue::single(value))
    }

    #[must_use]
    pub fn where_op(self, field: &str, operator: Operator, value: impl Into<DatabaseValue>) -> Self {
        self.where_filter(Connective::And, field, operator, FilterValue::single(value))
    }

    #[must_use]
    pub fn where_in<I, T>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<DatabaseValue>,
    {
        self.where_filter(Connective::And, field, Operator::In, FilterValue::list(values))
    }

    #[must_use]
    pub fn where_not_in<I, T>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<DatabaseValue>,
    {
        self.where_filter(Connective::And, field, Operator::NotIn, FilterValue::list(values))
    }

    #[must_use]
    pub fn where_null(self, field: &str) -> Self {
        self.where_filter(Connective::And, field, Operator::IsNull, FilterValue::None)
    }

    #[must_use]
    pub fn where_not_null(self, field: &str) -> Self {
        self.where_filter(Connective::And, field, Operator::IsNotNull, FilterValue::None)
    }

    #[must_use]
    pub fn or_where_eq(self, field: &str, value: impl Into<DatabaseValue>) -> Self {
        self.where_filter(Connective::Or, field, Operator::Eq, FilterValue::single(value))
    }

    #[must_use]
    pub fn or_where_op(self, field: &str, operator: Operator, value: impl Into<DatabaseValue>) -> Self {
        self.where_filter(Connective::Or, field, operator, FilterValue::single(value))
    }

    #[must_use]
    pub fn or_where_in<I, T>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<DatabaseValue>,
    {
        self.where_filter(Connective::Or, field, Operator::In, FilterValue::list(values))
    }

    /// General form of the `where_*` helpers
    #[must_use]
    pub fn where_filter(
        mut self,
        connective: Connective,
        field: &str,
        operator: Operator,
        value: FilterValue,
    ) -> Self {
        self.builder.add_where(connective, field, operator, value);
        self
    }

    #[must_use]
    pub fn group(mut self, fields: &str) -> Self {
        self.builder.add_group(fields);
        self
    }

    #[must_use]
    pub fn group_raw(mut self, expr: impl Into<String>) -> Self {
        self.builder.add_group_raw(expr);
        self
    }

    #[must_use]
    pub fn order_by_asc(mut self, field: &str) -> Self {
        self.builder.add_order(field, OrderDirection::Asc);
        self
    }

    #[must_use]
    pub fn order_by_desc(mut self, field: &str) -> Self {
        self.builder.add_order(field, OrderDirection::Desc);
        self
    }

    #[must_use]
    pub fn order_by_raw(mut self, expr: impl Into<String>) -> Self {
        self.builder.add_order_raw(expr);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.builder.set_offset(offset);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.builder.set_limit(limit);
        self
    }

    #[must_use]
    pub fn having(mut self, field: &str, operator: Operator, value: impl Into<DatabaseValue>) -> Self {
        self.builder
            .add_having(Connective::And, field, operator, FilterValue::single(value));
        self
    }

    #[must_use]
    pub fn or_having(mut self, field: &str, operator: Operator, value: impl Into<DatabaseValue>) -> Self {
        self.builder
            .add_having(Connective::Or, field, operator, FilterValue::single(value));
        self
    }

    /// HAVING on an aggregate expression, e.g. `having_raw("COUNT(*)", Operator::Gt, 1)`
    #[must_use]
    pub fn having_raw(
        mut self,
        expr: impl Into<String>,
        operator: Operator,
        value: impl Into<DatabaseValue>,
    ) -> Self {
        self.builder
            .add_having_raw(Connective::And, expr, operator, FilterValue::single(value));
        self
    }

    /// Eager load these associations after a read
    #[must_use]
    pub fn with(mut self, names: &[&str]) -> Self {
        for name in names {
            self.push_with(WithRelation::new(*name));
        }
        self
    }

    /// Eager load one association, adjusting its batched query with `configure`
    #[must_use]
    pub fn with_config<F>(mut self, name: &str, configure: F) -> Self
    where
        F: Fn(&mut QueryBuilder) + Send + Sync + 'static,
    {
        self.push_with(WithRelation::new(name).configure(configure));
        self
    }

    fn push_with(&mut self, relation: WithRelation) {
        match self.with_list.iter_mut().find(|r| r.name == relation.name) {
            Some(existing) => *existing = relation,
            None => self.with_list.push(relation),
        }
    }

    /// Skip these associations when cascading writes
    #[must_use]
    pub fn cancel_together(mut self, names: &[&str]) -> Self {
        self.cancel_together
            .extend(names.iter().map(|name| name.to_string()));
        self
    }

    pub fn builder(&self) -> &QueryBuilder {
        &self.builder
    }

    /// Direct access to the underlying builder for anything the fluent
    /// surface does not cover
    pub fn builder_mut(&mut self) -> &mut QueryBuilder {
        &mut self.builder
    }

    /// SQL and bind values the chain would currently run as a select
    pub fn to_sql(&self) -> Result<(String, Vec<DatabaseValue>)> {
        let conn = self.ctx.connection()?;
        let mut builder = self.builder.clone();
        if builder.operation().is_none() {
            builder.set_operation(Operation::Select);
        }
        Ok(builder.to_sql(conn.dialect(), conn.prefix()))
    }

    fn ensure_table(&self) -> Result<()> {
        if self.schema.table_name().is_empty() {
            return Err(DatabaseError::configuration(format!(
                "missing table name for {}",
                E::TYPE_NAME
            )));
        }
        Ok(())
    }

    fn emit(&self, event: Event, action: Action, rows: u64) -> Result<()> {
        self.ctx.emit(
            event,
            action,
            self.schema.table_name(),
            rows,
        )
    }

    /// Run the builder as a select
    async fn fetch(&mut self, conn: &Connection) -> Result<DatabaseResult> {
        self.builder.set_operation(Operation::Select);
        let (sql, params) = self.builder.to_sql(conn.dialect(), conn.prefix());
        self.ctx.query_on(conn, &sql, &params).await
    }

    /// Default the filter of an update or delete to the entity's primary key
    fn filter_by_primary_key(&mut self, entity: &E) {
        if self.builder.has_filter() {
            return;
        }
        let value = self
            .schema
            .primary_value(entity)
            .unwrap_or(DatabaseValue::Null);
        let pk = self.schema.primary_key().to_string();
        self.builder
            .add_where(Connective::And, &pk, Operator::Eq, FilterValue::Single(value));
    }

    /// Load the first matching row into `entity`.
    ///
    /// Returns `false`, leaving `entity` untouched, when nothing matches.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = E::TYPE_NAME))]
    pub async fn find(mut self, entity: &mut E) -> Result<bool> {
        self.ensure_table()?;
        let conn = self.ctx.connection()?;
        self.builder.set_limit(1);
        let rows = self.fetch(&conn).await?;

        let Some(row) = rows.first() else {
            self.emit(Event::QueryAfter, Action::Find, 0)?;
            return Ok(false);
        };
        self.schema.apply_row(entity, row)?;
        relation::eager_load(
            self.ctx,
            &self.schema,
            std::slice::from_mut(entity),
            &self.with_list,
        )
        .await?;
        self.emit(Event::QueryAfter, Action::Find, 1)?;
        Ok(true)
    }

    /// Append every matching row to `rows`; returns how many were appended
    #[tracing::instrument(level = "debug", skip_all, fields(entity = E::TYPE_NAME))]
    pub async fn select(mut self, rows: &mut Vec<E>) -> Result<usize> {
        self.ensure_table()?;
        let conn = self.ctx.connection()?;
        let result = self.fetch(&conn).await?;

        let start = rows.len();
        rows.reserve(result.len());
        for row in &result {
            self.schema.append_row(rows, row)?;
        }
        relation::eager_load(self.ctx, &self.schema, &mut rows[start..], &self.with_list).await?;

        let appended = rows.len() - start;
        self.emit(Event::QueryAfter, Action::Select, appended as u64)?;
        Ok(appended)
    }

    /// Matching rows as raw column maps with their field mapping
    #[tracing::instrument(level = "debug", skip_all, fields(entity = E::TYPE_NAME))]
    pub async fn collect(mut self) -> Result<Collection> {
        self.ensure_table()?;
        let conn = self.ctx.connection()?;
        let rows = self.fetch(&conn).await?;
        let collection = Collection::new(rows, self.schema.mapped_columns());
        self.emit(Event::QueryAfter, Action::Select, collection.len() as u64)?;
        Ok(collection)
    }

    /// Value of a single field from the first matching row
    #[tracing::instrument(level = "debug", skip_all, fields(entity = E::TYPE_NAME))]
    pub async fn value<T: ColumnValue>(mut self, field: &str) -> Result<Option<T>> {
        self.ensure_table()?;
        let conn = self.ctx.connection()?;
        self.builder.replace_fields(field).set_limit(1);
        let rows = self.fetch(&conn).await?;

        let value = match rows.first().and_then(|row| row.values().next()) {
            Some(raw) => Some(T::scan(raw)?),
            None => None,
        };
        self.emit(Event::QueryAfter, Action::Value, rows.len() as u64)?;
        Ok(value)
    }

    /// Whether any row matches
    #[tracing::instrument(level = "debug", skip_all, fields(entity = E::TYPE_NAME))]
    pub async fn exists(mut self) -> Result<bool> {
        self.ensure_table()?;
        let conn = self.ctx.connection()?;
        let pk = self.schema.primary_key().to_string();
        self.builder.replace_fields(&pk).set_limit(1);
        let rows = self.fetch(&conn).await?;
        self.emit(Event::QueryAfter, Action::Value, rows.len() as u64)?;
        Ok(!rows.is_empty())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(entity = E::TYPE_NAME))]
    pub async fn count(mut self) -> Result<i64> {
        self.ensure_table()?;
        let conn = self.ctx.connection()?;
        self.builder
            .replace_fields_raw(format!("COUNT(*) AS {}", COUNT_ALIAS));
        let rows = self.fetch(&conn).await?;

        let count = match rows.first().and_then(|row| row.get(COUNT_ALIAS)) {
            Some(raw) => i64::scan(raw)?,
            None => 0,
        };
        self.emit(Event::QueryAfter, Action::Aggregate, rows.len() as u64)?;
        Ok(count)
    }

    pub async fn sum<T: ColumnValue>(self, field: &str) -> Result<Option<T>> {
        self.aggregate("SUM", field).await
    }

    pub async fn max<T: ColumnValue>(self, field: &str) -> Result<Option<T>> {
        self.aggregate("MAX", field).await
    }

    pub async fn min<T: ColumnValue>(self, field: &str) -> Result<Option<T>> {
        self.aggregate("MIN", field).await
    }

    pub async fn avg(self, field: &str) -> Result<Option<f64>> {
        self.aggregate("AVG", field).await
    }

    /// `function(field)` over the matching rows; `None` when the result is NULL
    #[tracing::instrument(level = "debug", skip(self), fields(entity = E::TYPE_NAME))]
    async fn aggregate<T: ColumnValue>(mut self, function: &str, field: &str) -> Result<Option<T>> {
        self.ensure_table()?;
        let conn = self.ctx.connection()?;
        let column = conn.dialect().quote(&self.schema.column_name(field));
        self.builder
            .replace_fields_raw(format!("{}({}) AS {}", function, column, VALUE_ALIAS));
        let rows = self.fetch(&conn).await?;

        let value = match rows.first().and_then(|row| row.get(VALUE_ALIAS)) {
            Some(raw) if !raw.is_null() => Some(T::scan(raw)?),
            _ => None,
        };
        self.emit(Event::QueryAfter, Action::Aggregate, rows.len() as u64)?;
        Ok(value)
    }

    /// Insert `entity` and its non-empty associations.
    ///
    /// An integer primary key is written back from the generated identity.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = E::TYPE_NAME))]
    pub async fn create(mut self, entity: &mut E) -> Result<u64> {
        self.ensure_table()?;
        let conn = self.ctx.connection()?;
        self.builder
            .set_operation(Operation::Insert)
            .set_data(self.schema.column_values(entity));
        let (sql, params) = self.builder.to_sql(conn.dialect(), conn.prefix());

        let (affected, identity) = match conn.dialect().identity_retrieval() {
            IdentityRetrieval::LastInsertId => {
                let result = self.ctx.execute_on(&conn, &sql, &params).await?;
                (result.rows_affected, result.last_insert_id)
            }
            IdentityRetrieval::TrailingSelect => {
                let rows = self.ctx.query_on(&conn, &sql, &params).await?;
                let identity = match rows.first().and_then(|row| row.values().next()) {
                    Some(raw) if !raw.is_null() => Some(i64::scan(raw)?),
                    _ => None,
                };
                (1, identity)
            }
        };

        if let Some(id) = identity.filter(|_| self.schema.has_generated_key()) {
            let pk = self.schema.primary_key().to_string();
            self.schema.set_value(entity, &pk, &DatabaseValue::Long(id))?;
        }

        relation::cascade_create(self.ctx, &self.schema, entity, &self.cancel_together).await?;
        self.emit(Event::InsertAfter, Action::Create, affected)?;
        Ok(affected)
    }

    /// Update `entity`'s row, by primary key unless a filter was given, then
    /// its non-empty associations.
    ///
    /// With no writable column left the row statement is skipped and counts
    /// as zero rows; the associations are still written.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = E::TYPE_NAME))]
    pub async fn update(mut self, entity: &E) -> Result<u64> {
        self.ensure_table()?;
        let conn = self.ctx.connection()?;
        self.filter_by_primary_key(entity);
        self.builder
            .set_operation(Operation::Update)
            .set_data(self.schema.column_values(entity));
        let affected = if self.builder.has_writable_data() {
            let (sql, params) = self.builder.to_sql(conn.dialect(), conn.prefix());
            self.ctx.execute_on(&conn, &sql, &params).await?.rows_affected
        } else {
            tracing::debug!(entity = E::TYPE_NAME, "No writable columns, skipping update statement");
            0
        };

        relation::cascade_write(
            self.ctx,
            &self.schema,
            entity,
            &self.cancel_together,
            CascadeAction::Update,
        )
        .await?;
        self.emit(Event::UpdateAfter, Action::Update, affected)?;
        Ok(affected)
    }

    /// Delete `entity`'s row, by primary key unless a filter was given, then
    /// its non-empty associations
    #[tracing::instrument(level = "debug", skip_all, fields(entity = E::TYPE_NAME))]
    pub async fn delete(mut self, entity: &E) -> Result<u64> {
        self.ensure_table()?;
        let conn = self.ctx.connection()?;
        self.filter_by_primary_key(entity);
        self.builder.set_operation(Operation::Delete);
        let (sql, params) = self.builder.to_sql(conn.dialect(), conn.prefix());
        let result = self.ctx.execute_on(&conn, &sql, &params).await?;

        relation::cascade_write(
            self.ctx,
            &self.schema,
            entity,
            &self.cancel_together,
            CascadeAction::Delete,
        )
        .await?;
        self.emit(Event::DeleteAfter, Action::Delete, result.rows_affected)?;
        Ok(result.rows_affected)
    }
}

impl<E: Entity> std::fmt::Debug for Model<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("entity", &E::TYPE_NAME)
            .field("builder", &self.builder)
            .field("with", &self.with_list)
            .field("cancel_together", &self.cancel_together)
            .finish()
    }
}
