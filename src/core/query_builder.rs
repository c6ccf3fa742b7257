//! Dialect-aware SQL query builder
//!
//! One [`QueryBuilder`] accumulates the state of a single logical operation
//! across a fluent call chain and is serialized once with [`QueryBuilder::to_sql`].
//! Values are never interpolated into the SQL text; every value becomes a
//! positional placeholder and the bound values are returned alongside the text
//! in emission order.
//!
//! The builder does not validate its input. An empty table name or a missing
//! WHERE on an update produces exactly the SQL that was asked for; callers check
//! those preconditions before serializing.

use super::dialect::Dialect;
use super::filter::{Condition, Connective, Expr, Filter, FilterValue, Operator};
use super::value::DatabaseValue;
use std::sync::Arc;

/// Translates logical field names to columns for one table
pub trait ColumnLookup: Send + Sync {
    /// Unprefixed table name
    fn table_name(&self) -> &str;

    /// Field name of the primary key
    fn primary_key(&self) -> &str;

    /// Column for a field; names that are not fields pass through unchanged
    fn column_name(&self, field: &str) -> String;

    /// Columns selected when no explicit projection is given, as
    /// `(field, column)` pairs in declaration order
    fn mapped_columns(&self) -> Vec<(String, String)>;

    /// Whether the field is an association rather than a column
    fn is_association(&self, field: &str) -> bool;
}

/// Lookup for tables with no registered schema: every field is its own column
#[derive(Debug, Clone)]
pub struct IdentityLookup {
    table: String,
    primary_key: String,
}

impl IdentityLookup {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_key: "id".to_string(),
        }
    }

    #[must_use]
    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }
}

impl ColumnLookup for IdentityLookup {
    fn table_name(&self) -> &str {
        &self.table
    }

    fn primary_key(&self) -> &str {
        &self.primary_key
    }

    fn column_name(&self, field: &str) -> String {
        field.to_string()
    }

    fn mapped_columns(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn is_association(&self, _field: &str) -> bool {
        false
    }
}

/// Statement kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

/// ORDER BY direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order
    Asc,
    /// Descending order
    Desc,
}

impl OrderDirection {
    fn as_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone)]
enum Order {
    Column(String, OrderDirection),
    Raw(String),
}

/// Accumulated state of one operation
#[derive(Clone)]
pub struct QueryBuilder {
    lookup: Arc<dyn ColumnLookup>,
    operation: Option<Operation>,
    fields: Vec<Expr>,
    ignored: Vec<String>,
    filter: Filter,
    having: Filter,
    groups: Vec<Expr>,
    orders: Vec<Order>,
    offset: Option<u64>,
    limit: Option<u64>,
    data: Vec<(String, DatabaseValue)>,
}

impl std::fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("table", &self.lookup.table_name())
            .field("operation", &self.operation)
            .field("fields", &self.fields)
            .field("filter", &self.filter)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl QueryBuilder {
    /// Create a builder for the table described by `lookup`
    pub fn new(lookup: Arc<dyn ColumnLookup>) -> Self {
        Self {
            lookup,
            operation: None,
            fields: Vec::new(),
            ignored: Vec::new(),
            filter: Filter::new(),
            having: Filter::new(),
            groups: Vec::new(),
            orders: Vec::new(),
            offset: None,
            limit: None,
            data: Vec::new(),
        }
    }

    /// Builder for a table with no registered schema
    pub fn for_table(table: impl Into<String>) -> Self {
        Self::new(Arc::new(IdentityLookup::new(table)))
    }

    pub fn lookup(&self) -> &Arc<dyn ColumnLookup> {
        &self.lookup
    }

    pub fn operation(&self) -> Option<Operation> {
        self.operation
    }

    /// Add fields to the projection; accepts a comma separated list
    pub fn add_field(&mut self, fields: &str) -> &mut Self {
        self.fields.extend(
            fields
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(|f| Expr::Column(f.to_string())),
        );
        self
    }

    /// Add a hand-written select expression
    pub fn add_field_raw(&mut self, expr: impl Into<String>) -> &mut Self {
        self.fields.push(Expr::Raw(expr.into()));
        self
    }

    /// Drop the projection and select only `fields`
    pub fn replace_fields(&mut self, fields: &str) -> &mut Self {
        self.fields.clear();
        self.add_field(fields)
    }

    /// Drop the projection and select only `expr`
    pub fn replace_fields_raw(&mut self, expr: impl Into<String>) -> &mut Self {
        self.fields = vec![Expr::Raw(expr.into())];
        self
    }

    /// Exclude a field from the default projection and from writes
    pub fn ignore_field(&mut self, fields: &str) -> &mut Self {
        self.ignored.extend(
            fields
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string),
        );
        self
    }

    pub fn add_where(
        &mut self,
        connective: Connective,
        field: &str,
        operator: Operator,
        value: FilterValue,
    ) -> &mut Self {
        self.filter.push(Condition {
            connective,
            target: Expr::Column(field.to_string()),
            operator,
            value,
        });
        self
    }

    pub fn add_having(
        &mut self,
        connective: Connective,
        field: &str,
        operator: Operator,
        value: FilterValue,
    ) -> &mut Self {
        self.having.push(Condition {
            connective,
            target: Expr::Column(field.to_string()),
            operator,
            value,
        });
        self
    }

    /// HAVING on an aggregate expression such as `COUNT(*)`
    pub fn add_having_raw(
        &mut self,
        connective: Connective,
        expr: impl Into<String>,
        operator: Operator,
        value: FilterValue,
    ) -> &mut Self {
        self.having.push(Condition {
            connective,
            target: Expr::Raw(expr.into()),
            operator,
            value,
        });
        self
    }

    pub fn add_order(&mut self, field: &str, direction: OrderDirection) -> &mut Self {
        self.orders.push(Order::Column(field.to_string(), direction));
        self
    }

    pub fn add_order_raw(&mut self, expr: impl Into<String>) -> &mut Self {
        self.orders.push(Order::Raw(expr.into()));
        self
    }

    pub fn add_group(&mut self, fields: &str) -> &mut Self {
        self.groups.extend(
            fields
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(|f| Expr::Column(f.to_string())),
        );
        self
    }

    pub fn add_group_raw(&mut self, expr: impl Into<String>) -> &mut Self {
        self.groups.push(Expr::Raw(expr.into()));
        self
    }

    pub fn set_offset(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    pub fn set_limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn set_operation(&mut self, operation: Operation) -> &mut Self {
        self.operation = Some(operation);
        self
    }

    /// Field values written by insert and update, in column order
    pub fn set_data(&mut self, data: Vec<(String, DatabaseValue)>) -> &mut Self {
        self.data = data;
        self
    }

    pub fn has_filter(&self) -> bool {
        !self.filter.is_empty()
    }

    /// Whether insert or update would write at least one column
    pub fn has_writable_data(&self) -> bool {
        self.writable().next().is_some()
    }

    fn table(&self, dialect: Dialect, prefix: &str) -> String {
        dialect.quote(&format!("{}{}", prefix, self.lookup.table_name()))
    }

    fn is_ignored(&self, field: &str) -> bool {
        self.ignored.iter().any(|f| f == field)
    }

    fn is_primary_key(&self, field: &str) -> bool {
        let pk = self.lookup.primary_key();
        field == pk || self.lookup.column_name(field) == self.lookup.column_name(pk)
    }

    /// Data that is actually written: no primary key, associations or ignored fields
    fn writable(&self) -> impl Iterator<Item = &(String, DatabaseValue)> + '_ {
        self.data.iter().filter(move |(field, _)| {
            !self.is_primary_key(field)
                && !self.lookup.is_association(field)
                && !self.is_ignored(field)
        })
    }

    fn render_where(&self, dialect: Dialect, sql: &mut String, params: &mut Vec<DatabaseValue>) {
        if !self.filter.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.filter.render(dialect, self.lookup.as_ref(), params));
        }
    }

    fn render_projection(&self, dialect: Dialect) -> String {
        let lookup = self.lookup.as_ref();
        let columns: Vec<String> = if self.fields.is_empty() {
            lookup
                .mapped_columns()
                .into_iter()
                .filter(|(field, _)| !self.is_ignored(field))
                .map(|(_, column)| dialect.quote(&column))
                .collect()
        } else {
            self.fields
                .iter()
                .filter(|f| !matches!(f, Expr::Column(name) if self.is_ignored(name)))
                .map(|f| f.render(dialect, lookup))
                .collect()
        };
        if columns.is_empty() {
            "*".to_string()
        } else {
            columns.join(", ")
        }
    }

    fn build_select(&self, dialect: Dialect, prefix: &str) -> (String, Vec<DatabaseValue>) {
        let lookup = self.lookup.as_ref();
        let mut params = Vec::new();
        let page = dialect.pagination(self.offset, self.limit, !self.orders.is_empty());

        let mut sql = format!(
            "SELECT {}{} FROM {}",
            page.prefix,
            self.render_projection(dialect),
            self.table(dialect, prefix)
        );

        self.render_where(dialect, &mut sql, &mut params);

        if !self.groups.is_empty() {
            let groups: Vec<String> = self.groups.iter().map(|g| g.render(dialect, lookup)).collect();
            sql.push_str(&format!(" GROUP BY {}", groups.join(", ")));
        }

        if !self.having.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&self.having.render(dialect, lookup, &mut params));
        }

        if !self.orders.is_empty() {
            let orders: Vec<String> = self
                .orders
                .iter()
                .map(|order| match order {
                    Order::Column(field, dir) => {
                        format!("{} {}", dialect.quote(&lookup.column_name(field)), dir.as_sql())
                    }
                    Order::Raw(expr) => expr.clone(),
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
        }

        sql.push_str(&page.suffix);
        (sql, params)
    }

    fn build_insert(&self, dialect: Dialect, prefix: &str) -> (String, Vec<DatabaseValue>) {
        let (columns, params): (Vec<String>, Vec<DatabaseValue>) = self
            .writable()
            .map(|(field, value)| (dialect.quote(&self.lookup.column_name(field)), value.clone()))
            .unzip();

        let mut sql = format!("INSERT INTO {}", self.table(dialect, prefix));
        if columns.is_empty() {
            sql.push_str(dialect.empty_insert());
        } else {
            let placeholders = vec![dialect.placeholder(); columns.len()];
            sql.push_str(&format!(
                " ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            ));
        }
        if let Some(identity) = dialect.identity_select() {
            sql.push_str(identity);
        }
        (sql, params)
    }

    fn build_update(&self, dialect: Dialect, prefix: &str) -> (String, Vec<DatabaseValue>) {
        let mut params = Vec::new();
        let assignments: Vec<String> = self
            .writable()
            .map(|(field, value)| {
                params.push(value.clone());
                format!(
                    "{} = {}",
                    dialect.quote(&self.lookup.column_name(field)),
                    dialect.placeholder()
                )
            })
            .collect();

        let mut sql = format!(
            "UPDATE {} SET {}",
            self.table(dialect, prefix),
            assignments.join(", ")
        );
        self.render_where(dialect, &mut sql, &mut params);
        (sql, params)
    }

    fn build_delete(&self, dialect: Dialect, prefix: &str) -> (String, Vec<DatabaseValue>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", self.table(dialect, prefix));
        self.render_where(dialect, &mut sql, &mut params);
        (sql, params)
    }

    /// Serialize to SQL text plus bind values in placeholder order.
    ///
    /// An unset operation serializes as a select.
    pub fn to_sql(&self, dialect: Dialect, prefix: &str) -> (String, Vec<DatabaseValue>) {
        match self.operation.unwrap_or(Operation::Select) {
            Operation::Select => self.build_select(dialect, prefix),
            Operation::Insert => self.build_insert(dialect, prefix),
            Operation::Update => self.build_update(dialect, prefix),
            Operation::Delete => self.build_delete(dialect, prefix),
        }
    }
}
