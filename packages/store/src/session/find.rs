use std::collections::HashSet;
use std::sync::Arc;

use common::Value;
use common::schema::split_identity;
use futures::future::BoxFuture;
use sea_orm::sea_query::Query as SeaQuery;
use sea_orm::{ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use tracing::{debug, instrument};

use super::{EntityHandle, ParentRef, Session};
use crate::entity::{context as context_table, entities};
use crate::error::{Result, StoreError};
use crate::query::filter::{self, Attribute, Compiler, FilterKey, resolve_key};
use crate::query::{Criterion, Filter, FindOptions, Predicate};

impl Session {
    /// Entities of `type_name` matching every criterion of `filter`, with
    /// strict string matching.
    pub async fn find(&mut self, type_name: &str, filter: &Filter) -> Result<Vec<EntityHandle>> {
        self.find_with(type_name, filter, FindOptions::default()).await
    }

    /// Flat search. Pending changes are flushed first so the database sees
    /// them. Results are ordered by id.
    #[instrument(skip(self, filter), fields(session = %self.id))]
    pub async fn find_with(
        &mut self,
        type_name: &str,
        filter: &Filter,
        options: FindOptions,
    ) -> Result<Vec<EntityHandle>> {
        let condition = self.compile(type_name, filter, options)?;
        self.flush().await?;

        let rows = entities::Entity::find()
            .filter(condition)
            .order_by_asc(entities::Column::Id)
            .all(&self.txn)
            .await?;
        debug!(matches = rows.len(), "Flat search finished");
        self.hydrate(rows).await
    }

    fn compile(&self, type_name: &str, filter: &Filter, options: FindOptions) -> Result<Condition> {
        let registry = Arc::clone(&self.registry);
        let (identity, schema) = registry.entity_by_name(type_name)?;
        Compiler::new(self.txn.get_database_backend(), options).compile(identity, schema, filter)
    }

    pub async fn find_first(
        &mut self,
        type_name: &str,
        filter: &Filter,
    ) -> Result<Option<EntityHandle>> {
        Ok(self.find(type_name, filter).await?.into_iter().next())
    }

    /// Every entity of `type_name`.
    pub async fn find_all(&mut self, type_name: &str) -> Result<Vec<EntityHandle>> {
        self.find(type_name, &Filter::new()).await
    }

    pub async fn find_by_id(&mut self, id: i32) -> Result<Option<EntityHandle>> {
        self.flush().await?;
        match self.load(id).await {
            Ok(handle) => Ok(Some(handle)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn find_by_unique_id(&mut self, unique_id: &str) -> Result<Option<EntityHandle>> {
        self.flush().await?;
        let row = entities::Entity::find()
            .filter(entities::Column::UniqueId.eq(unique_id))
            .one(&self.txn)
            .await?;
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    /// Entities without a parent, optionally only of one type.
    pub async fn find_roots(&mut self, type_name: Option<&str>) -> Result<Vec<EntityHandle>> {
        let mut condition = Condition::all().add(entities::Column::ParentId.is_null());
        if let Some(type_name) = type_name {
            let (identity, _) = self.registry.entity_by_name(type_name)?;
            condition = condition.add(entities::Column::TypeName.eq(identity));
        }
        self.flush().await?;

        let rows = entities::Entity::find()
            .filter(condition)
            .order_by_asc(entities::Column::Id)
            .all(&self.txn)
            .await?;
        self.hydrate(rows).await
    }

    /// Entities of `type_name` holding at least one attachment of
    /// `related_type` that matches `filter`.
    pub async fn find_related(
        &mut self,
        type_name: &str,
        related_type: &str,
        filter: &Filter,
    ) -> Result<Vec<EntityHandle>> {
        let related = self.compile(related_type, filter, FindOptions::default())?;
        let own = self.compile(type_name, &Filter::new(), FindOptions::default())?;
        self.flush().await?;

        let holders = SeaQuery::select()
            .column(context_table::Column::HolderId)
            .from(context_table::Entity)
            .and_where(
                context_table::Column::AttachmentId.in_subquery(
                    SeaQuery::select()
                        .column(entities::Column::Id)
                        .from(entities::Entity)
                        .cond_where(related)
                        .to_owned(),
                ),
            )
            .to_owned();

        let rows = entities::Entity::find()
            .filter(own)
            .filter(entities::Column::Id.in_subquery(holders))
            .order_by_asc(entities::Column::Id)
            .all(&self.txn)
            .await?;
        self.hydrate(rows).await
    }

    /// Search with a predicate tree, strict string matching.
    pub async fn find_complex(&mut self, predicate: &Predicate) -> Result<Vec<EntityHandle>> {
        self.find_complex_with(predicate, FindOptions::default()).await
    }

    /// Search with a predicate tree.
    ///
    /// The root must be an `Entity` node, or an `Any`/`All` over such nodes.
    /// An `Entity` node sends the plain parameter tests of its top-level
    /// `All` to the database and checks the rest per candidate.
    pub fn find_complex_with<'a>(
        &'a mut self,
        predicate: &'a Predicate,
        options: FindOptions,
    ) -> BoxFuture<'a, Result<Vec<EntityHandle>>> {
        Box::pin(async move {
            match predicate {
                Predicate::Entity(type_name, inner) => {
                    let registry = Arc::clone(&self.registry);
                    let (_, schema) = registry.entity_by_name(type_name)?;

                    let (pushed, residual) = split_pushdown(inner, |key| {
                        resolve_key(schema, key).is_some()
                    });
                    let candidates = self.find_with(type_name, &pushed, options).await?;

                    let residual = Predicate::entity(type_name.clone(), residual);
                    let mut out = Vec::with_capacity(candidates.len());
                    for candidate in candidates {
                        if self.eval(&residual, Some(candidate.slot), options).await? {
                            out.push(candidate);
                        }
                    }
                    Ok(out)
                }
                Predicate::Any(items) => {
                    let mut seen = HashSet::new();
                    let mut out = Vec::new();
                    for item in items {
                        for handle in self.find_complex_with(item, options).await? {
                            if seen.insert(handle) {
                                out.push(handle);
                            }
                        }
                    }
                    out.sort_by_key(|h| self.arena[h.slot].id);
                    Ok(out)
                }
                Predicate::All(items) => {
                    let Some((first, rest)) = items.split_first() else {
                        return Err(StoreError::Filter(
                            "an empty ALL has no candidate type".to_string(),
                        ));
                    };
                    let candidates = self.find_complex_with(first, options).await?;
                    let mut out = Vec::with_capacity(candidates.len());
                    'candidates: for candidate in candidates {
                        for item in rest {
                            if !self.eval(item, Some(candidate.slot), options).await? {
                                continue 'candidates;
                            }
                        }
                        out.push(candidate);
                    }
                    Ok(out)
                }
                other => Err(StoreError::Filter(format!(
                    "a search must start from an entity node, got {other:?}"
                ))),
            }
        })
    }

    /// Evaluate `predicate` against one entity, strict string matching.
    pub async fn is_valid(&mut self, predicate: &Predicate, handle: EntityHandle) -> Result<bool> {
        self.is_valid_with(predicate, handle, FindOptions::default())
            .await
    }

    pub async fn is_valid_with(
        &mut self,
        predicate: &Predicate,
        handle: EntityHandle,
        options: FindOptions,
    ) -> Result<bool> {
        let slot = self.slot(handle)?;
        self.eval(predicate, Some(slot), options).await
    }

    fn eval<'a>(
        &'a mut self,
        predicate: &'a Predicate,
        slot: Option<usize>,
        options: FindOptions,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let Some(slot) = slot else {
                return Ok(false);
            };
            if self.arena[slot].deleted {
                return Ok(false);
            }

            match predicate {
                Predicate::Any(items) => {
                    for item in items {
                        if self.eval(item, Some(slot), options).await? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                Predicate::All(items) => {
                    for item in items {
                        if !self.eval(item, Some(slot), options).await? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                Predicate::Parent(inner) => {
                    let parent = self.parent_slot(slot).await?;
                    self.eval(inner, parent, options).await
                }
                Predicate::Child(inner) => {
                    let children = self.children(self.handle(slot)).await?;
                    for child in children {
                        if self.eval(inner, Some(child.slot), options).await? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                Predicate::With(test) => {
                    let view = self.view(self.handle(slot))?;
                    Ok(test(&view))
                }
                Predicate::Param(key, criterion) => self.eval_param(slot, key, criterion, options),
                Predicate::Entity(type_name, inner) => {
                    if !self.is_of_type(slot, type_name) {
                        return Ok(false);
                    }
                    self.eval(inner, Some(slot), options).await
                }
            }
        })
    }

    /// A key the entity's type does not know never matches.
    fn eval_param(
        &self,
        slot: usize,
        key: &str,
        criterion: &Criterion,
        options: FindOptions,
    ) -> Result<bool> {
        let state = &self.arena[slot];
        let schema = self
            .registry
            .get(&state.type_name)
            .ok_or_else(|| StoreError::UnknownType(state.type_name.clone()))?;

        match resolve_key(schema, key) {
            None => Ok(false),
            Some(FilterKey::Param(kind)) => {
                filter::matches(key, kind, state.params.get(key), criterion, options)
            }
            Some(FilterKey::Attribute(attribute)) => {
                let value = match attribute {
                    Attribute::Id => state.id.map(|id| Value::Integer(id.into())),
                    Attribute::UniqueId => state.unique_id.clone().map(Value::String),
                    Attribute::ParentId => {
                        let parent_id = match state.parent {
                            ParentRef::Root => None,
                            ParentRef::Stored(id) => Some(id),
                            ParentRef::Slot(parent) => self.arena[parent].id,
                        };
                        parent_id.map(|id| Value::Integer(id.into()))
                    }
                };
                filter::matches(key, attribute.kind(), value.as_ref(), criterion, options)
            }
        }
    }

    fn is_of_type(&self, slot: usize, type_name: &str) -> bool {
        let identity = &self.arena[slot].type_name;
        identity == type_name || split_identity(identity).is_ok_and(|(bare, _)| bare == type_name)
    }
}

/// Split the inner predicate of an entity node into plain parameter tests
/// the database can run and the remainder to check per candidate.
fn split_pushdown(inner: &Predicate, known: impl Fn(&str) -> bool) -> (Filter, Predicate) {
    let items: &[Predicate] = match inner {
        Predicate::All(items) => items,
        single @ Predicate::Param(..) => std::slice::from_ref(single),
        other => return (Filter::new(), other.clone()),
    };

    let mut pushed = Filter::new();
    let mut residual = Vec::new();
    for item in items {
        match item {
            Predicate::Param(key, criterion) if known(key) => {
                pushed.push(key.clone(), criterion.clone());
            }
            other => residual.push(other.clone()),
        }
    }
    (pushed, Predicate::All(residual))
}
