//! Association resolution
//!
//! Eager loading issues one query per requested association, whatever the
//! number of parent rows, and stitches the children back onto their parents by
//! comparing key values in their textual form. Cascading writes run the child
//! model's create/update/delete for every element of a non-empty association.

use crate::core::error::{DatabaseError, Result};
use crate::core::query_builder::QueryBuilder;
use crate::core::value::DatabaseValue;
use crate::orm::context::Context;
use crate::orm::schema::{Entity, Schema};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Adjusts the batched query for one association (extra filters, order, limit)
pub type Configurator = Arc<dyn Fn(&mut QueryBuilder) + Send + Sync>;

/// An association requested for eager loading
#[derive(Clone)]
pub struct WithRelation {
    pub name: String,
    pub configure: Option<Configurator>,
}

impl WithRelation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            configure: None,
        }
    }

    #[must_use]
    pub fn configure<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut QueryBuilder) + Send + Sync + 'static,
    {
        self.configure = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for WithRelation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WithRelation")
            .field("name", &self.name)
            .field("configured", &self.configure.is_some())
            .finish()
    }
}

/// Key fields used to load one association
pub(crate) struct LoadPlan {
    /// Parent field holding the key
    pub primary: String,
    /// Child field referencing the parent
    pub foreign: String,
    pub configure: Option<Configurator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CascadeAction {
    Update,
    Delete,
}

/// Type-erased operations on one association of `P`
#[async_trait]
pub(crate) trait AssociationOps<P: Entity>: Send + Sync {
    /// Whether the association holds nothing to cascade
    fn is_empty(&self, parent: &P) -> bool;

    async fn load(&self, ctx: &Context, parents: &mut [P], plan: &LoadPlan) -> Result<()>;

    async fn create_all(&self, ctx: &Context, parent: &mut P) -> Result<()>;

    async fn write_all(&self, ctx: &Context, parent: &P, action: CascadeAction) -> Result<()>;
}

pub(crate) struct HasOne<P, C> {
    pub(crate) get: fn(&P) -> &Option<C>,
    pub(crate) get_mut: fn(&mut P) -> &mut Option<C>,
}

pub(crate) struct HasMany<P, C> {
    pub(crate) get: fn(&P) -> &Vec<C>,
    pub(crate) get_mut: fn(&mut P) -> &mut Vec<C>,
}

/// Child indices grouped by the textual form of their foreign key
struct Stitch<C> {
    children: Vec<C>,
    by_key: HashMap<String, Vec<usize>>,
}

impl<C: Entity> Stitch<C> {
    fn new(children: Vec<C>, plan: &LoadPlan) -> Self {
        let schema = Schema::<C>::reflect();
        let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, child) in children.iter().enumerate() {
            if let Some(key) = key_of(&schema, child, &plan.foreign) {
                by_key.entry(key).or_default().push(i);
            }
        }
        Self { children, by_key }
    }

    /// Children matching `parent`, in result order
    fn matches<'a, P: Entity>(
        &'a self,
        schema: &Schema<P>,
        parent: &P,
        plan: &LoadPlan,
    ) -> impl Iterator<Item = &'a C> + 'a {
        key_of(schema, parent, &plan.primary)
            .and_then(|key| self.by_key.get(&key))
            .into_iter()
            .flatten()
            .map(move |i| &self.children[*i])
    }
}

fn key_of<E: Entity>(schema: &Schema<E>, entity: &E, name: &str) -> Option<String> {
    schema
        .get_value(entity, name)
        .and_then(|value| value.to_text().map(|text| text.into_owned()))
}

/// Run the single batched query for an association
async fn fetch_children<P: Entity, C: Entity>(
    ctx: &Context,
    parents: &[P],
    plan: &LoadPlan,
) -> Result<Vec<C>> {
    let schema = Schema::<P>::reflect();
    let mut seen = HashSet::new();
    let mut keys: Vec<DatabaseValue> = Vec::new();
    for parent in parents {
        let Some(value) = schema.get_value(parent, &plan.primary) else {
            continue;
        };
        let Some(text) = value.to_text().map(|t| t.into_owned()) else {
            continue;
        };
        if seen.insert(text) {
            keys.push(value);
        }
    }
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let mut model = ctx.model::<C>().where_in(&plan.foreign, keys);
    if let Some(configure) = &plan.configure {
        configure(model.builder_mut());
    }
    let mut children = Vec::new();
    model.select(&mut children).await?;
    Ok(children)
}

#[async_trait]
impl<P: Entity, C: Entity> AssociationOps<P> for HasOne<P, C> {
    fn is_empty(&self, parent: &P) -> bool {
        (self.get)(parent).is_none()
    }

    async fn load(&self, ctx: &Context, parents: &mut [P], plan: &LoadPlan) -> Result<()> {
        let children = fetch_children::<P, C>(ctx, parents, plan).await?;
        let stitch = Stitch::new(children, plan);
        let schema = Schema::<P>::reflect();
        for parent in parents.iter_mut() {
            let first = stitch.matches(&schema, parent, plan).next().cloned();
            *(self.get_mut)(parent) = first;
        }
        Ok(())
    }

    async fn create_all(&self, ctx: &Context, parent: &mut P) -> Result<()> {
        if let Some(child) = (self.get_mut)(parent).as_mut() {
            ctx.model::<C>().create(child).await?;
        }
        Ok(())
    }

    async fn write_all(&self, ctx: &Context, parent: &P, action: CascadeAction) -> Result<()> {
        if let Some(child) = (self.get)(parent).as_ref() {
            write_child(ctx, child, action).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<P: Entity, C: Entity> AssociationOps<P> for HasMany<P, C> {
    fn is_empty(&self, parent: &P) -> bool {
        (self.get)(parent).is_empty()
    }

    async fn load(&self, ctx: &Context, parents: &mut [P], plan: &LoadPlan) -> Result<()> {
        let children = fetch_children::<P, C>(ctx, parents, plan).await?;
        let stitch = Stitch::new(children, plan);
        let schema = Schema::<P>::reflect();
        for parent in parents.iter_mut() {
            let matched: Vec<C> = stitch.matches(&schema, parent, plan).cloned().collect();
            *(self.get_mut)(parent) = matched;
        }
        Ok(())
    }

    async fn create_all(&self, ctx: &Context, parent: &mut P) -> Result<()> {
        for child in (self.get_mut)(parent).iter_mut() {
            ctx.model::<C>().create(child).await?;
        }
        Ok(())
    }

    async fn write_all(&self, ctx: &Context, parent: &P, action: CascadeAction) -> Result<()> {
        for child in (self.get)(parent) {
            write_child(ctx, child, action).await?;
        }
        Ok(())
    }
}

async fn write_child<C: Entity>(ctx: &Context, child: &C, action: CascadeAction) -> Result<()> {
    match action {
        CascadeAction::Update => ctx.model::<C>().update(child).await?,
        CascadeAction::Delete => ctx.model::<C>().delete(child).await?,
    };
    Ok(())
}

/// Load every association named in `with_list` onto `parents`.
///
/// Names that are not associations of `P` are skipped.
pub(crate) async fn eager_load<P: Entity>(
    ctx: &Context,
    schema: &Schema<P>,
    parents: &mut [P],
    with_list: &[WithRelation],
) -> Result<()> {
    if parents.is_empty() {
        return Ok(());
    }

    for relation in with_list {
        let Some(association) = schema.association(&relation.name) else {
            tracing::warn!(
                entity = P::TYPE_NAME,
                relation = %relation.name,
                "Ignoring unknown association"
            );
            continue;
        };

        let field = schema.association_field(association);
        let plan = LoadPlan {
            primary: field.primary_name(schema).to_string(),
            foreign: field.foreign_name(schema),
            configure: relation.configure.clone(),
        };
        tracing::debug!(
            entity = P::TYPE_NAME,
            relation = %association.name,
            parents = parents.len(),
            foreign = %plan.foreign,
            "Eager loading association"
        );
        association
            .ops
            .load(ctx, parents, &plan)
            .await
            .map_err(|err| DatabaseError::relation(association.name.clone(), err))?;
    }
    Ok(())
}

/// Create every associated row of `parent`, skipping names in `cancel`
pub(crate) async fn cascade_create<P: Entity>(
    ctx: &Context,
    schema: &Schema<P>,
    parent: &mut P,
    cancel: &[String],
) -> Result<()> {
    for association in schema.associations() {
        if cancel.contains(&association.name) || association.ops.is_empty(parent) {
            continue;
        }
        association
            .ops
            .create_all(ctx, parent)
            .await
            .map_err(|err| DatabaseError::relation(association.name.clone(), err))?;
    }
    Ok(())
}

/// Update or delete every associated row of `parent`, skipping names in `cancel`
pub(crate) async fn cascade_write<P: Entity>(
    ctx: &Context,
    schema: &Schema<P>,
    parent: &P,
    cancel: &[String],
    action: CascadeAction,
) -> Result<()> {
    for association in schema.associations() {
        if cancel.contains(&association.name) || association.ops.is_empty(parent) {
            continue;
        }
        association
            .ops
            .write_all(ctx, parent, action)
            .await
            .map_err(|err| DatabaseError::relation(association.name.clone(), err))?;
    }
    Ok(())
}
