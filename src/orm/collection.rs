//! Result envelope for untyped reads

use crate::core::error::Result;
use crate::core::value::{DatabaseResult, DatabaseRow};
use crate::orm::schema::{Entity, Schema};
use indexmap::IndexMap;
use serde::Serialize;

/// Rows returned by [`Model::collect`](crate::orm::Model::collect) together
/// with the column to field mapping of the queried entity
#[derive(Debug, Clone, Default, Serialize)]
pub struct Collection {
    exist: bool,
    rows: DatabaseResult,
    /// column -> field
    fields: IndexMap<String, String>,
}

impl Collection {
    /// `mapped` holds `(field, column)` pairs
    pub(crate) fn new(rows: DatabaseResult, mapped: Vec<(String, String)>) -> Self {
        Self {
            exist: !rows.is_empty(),
            rows,
            fields: mapped
                .into_iter()
                .map(|(field, column)| (column, field))
                .collect(),
        }
    }

    /// Whether any row matched
    pub fn exist(&self) -> bool {
        self.exist
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows keyed by column name, exactly as the driver returned them
    pub fn raw_rows(&self) -> &DatabaseResult {
        &self.rows
    }

    pub fn field_name(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    /// Rows keyed by field name. Columns that do not map to a field are dropped.
    pub fn rows(&self) -> Vec<DatabaseRow> {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .filter_map(|(column, value)| {
                        self.field_name(column)
                            .map(|field| (field.to_string(), value.clone()))
                    })
                    .collect()
            })
            .collect()
    }

    pub fn first(&self) -> Option<DatabaseRow> {
        self.rows().into_iter().next()
    }

    /// Materialize the rows as entities
    pub fn to_entities<E: Entity>(&self) -> Result<Vec<E>> {
        let schema = Schema::<E>::reflect();
        let mut entities = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            schema.append_row(&mut entities, row)?;
        }
        Ok(entities)
    }
}
