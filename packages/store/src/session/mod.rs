mod context;
mod find;
mod hierarchy;
mod params;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use common::{RawValue, TypeSchema, Value};
use sea_orm::sea_query::{Expr, Query as SeaQuery};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseTransaction, EntityTrait, PaginatorTrait,
    QueryFilter, Set,
};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::DataConfig;
use crate::data::ChunkedData;
use crate::entity::{context as context_table, data, data_chunk, entities, parameter};
use crate::error::{Result, StoreError};
use crate::registry::TypeRegistry;

pub use params::InheritedParams;

/// Reference to an entity inside one session.
///
/// Handles are cheap to copy and stay valid for the lifetime of the session
/// that issued them, whether or not the entity has been persisted. Using a
/// handle with another session fails with [`StoreError::MissingSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle {
    session: Uuid,
    slot: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParentRef {
    Root,
    /// Parent held in this session's arena.
    Slot(usize),
    /// Persisted parent not loaded yet.
    Stored(i32),
}

#[derive(Debug, Clone)]
struct EntityState {
    id: Option<i32>,
    unique_id: Option<String>,
    /// Stored type identity.
    type_name: String,
    parent: ParentRef,
    params: BTreeMap<String, Value>,
    row_dirty: bool,
    params_dirty: bool,
    deleted: bool,
}

impl EntityState {
    fn needs_write(&self) -> bool {
        self.id.is_none() || self.row_dirty || self.params_dirty
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingLink {
    holder: usize,
    attachment: usize,
    label: String,
}

/// Read-only snapshot of one entity, handed to caller-supplied tests.
#[derive(Debug, Clone, Copy)]
pub struct EntityView<'a> {
    pub handle: EntityHandle,
    pub id: Option<i32>,
    pub unique_id: Option<&'a str>,
    /// Stored type identity, `Name_<hash>`.
    pub type_name: &'a str,
    pub params: &'a BTreeMap<String, Value>,
}

impl EntityView<'_> {
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Type name without the schema hash.
    pub fn short_type_name(&self) -> &str {
        self.type_name
            .split_once('_')
            .map_or(self.type_name, |(name, _)| name)
    }
}

/// A unit of work over one database transaction.
///
/// Entities created or loaded through a session live in its arena and are
/// addressed by [`EntityHandle`]. Changes stay in memory until `save`,
/// `flush` or `commit` write them into the transaction; they become
/// visible to other connections only on `commit`. Dropping a session
/// without committing rolls the transaction back.
pub struct Session {
    id: Uuid,
    txn: DatabaseTransaction,
    registry: Arc<TypeRegistry>,
    data_config: DataConfig,
    arena: Vec<EntityState>,
    by_id: HashMap<i32, usize>,
    links: Vec<PendingLink>,
    /// Persisted associations removed in this session: (holder, attachment, label).
    unlinks: Vec<(i32, i32, String)>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("entities", &self.arena.len())
            .field("pending_links", &self.links.len())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        txn: DatabaseTransaction,
        registry: Arc<TypeRegistry>,
        data_config: DataConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            txn,
            registry,
            data_config,
            arena: Vec::new(),
            by_id: HashMap::new(),
            links: Vec::new(),
            unlinks: Vec::new(),
        }
    }

    /// The underlying transaction, for low-level access.
    pub fn connection(&self) -> &DatabaseTransaction {
        &self.txn
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Write pending changes and commit the transaction.
    #[instrument(skip(self), fields(session = %self.id))]
    pub async fn commit(mut self) -> Result<()> {
        self.flush().await?;
        self.txn.commit().await?;
        info!("Session committed");
        Ok(())
    }

    /// Discard the transaction and every change made through this session.
    pub async fn rollback(self) -> Result<()> {
        self.txn.rollback().await?;
        debug!(session = %self.id, "Session rolled back");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Creation and access
    // ------------------------------------------------------------------

    /// Create an unsaved entity of `type_name` (a bare name or a stored
    /// identity).
    pub fn create(&mut self, type_name: &str) -> Result<EntityHandle> {
        self.create_with(type_name, Vec::<(String, RawValue)>::new())
    }

    /// Create an unsaved entity with initial parameters. Nothing is added to
    /// the session if any parameter is invalid.
    pub fn create_with<I, K, V>(&mut self, type_name: &str, params: I) -> Result<EntityHandle>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<RawValue>,
    {
        let (identity, schema) = self.registry.entity_by_name(type_name)?;
        let mut values = BTreeMap::new();
        for (name, raw) in params {
            let name = name.into();
            let value = coerce_param(identity, schema, &name, raw.into())?;
            values.insert(name, value);
        }

        let state = EntityState {
            id: None,
            unique_id: None,
            type_name: identity.to_string(),
            parent: ParentRef::Root,
            params: values,
            row_dirty: true,
            params_dirty: true,
            deleted: false,
        };
        Ok(self.push(state))
    }

    fn push(&mut self, state: EntityState) -> EntityHandle {
        let slot = self.arena.len();
        if let Some(id) = state.id {
            self.by_id.insert(id, slot);
        }
        self.arena.push(state);
        self.handle(slot)
    }

    fn handle(&self, slot: usize) -> EntityHandle {
        EntityHandle {
            session: self.id,
            slot,
        }
    }

    /// Arena slot of a handle issued by this session.
    fn slot(&self, handle: EntityHandle) -> Result<usize> {
        if handle.session != self.id || handle.slot >= self.arena.len() {
            return Err(StoreError::MissingSession);
        }
        Ok(handle.slot)
    }

    /// Like `slot`, but deleted entities are rejected.
    fn live(&self, handle: EntityHandle) -> Result<usize> {
        let slot = self.slot(handle)?;
        if self.arena[slot].deleted {
            return Err(StoreError::StaleObject(self.describe_slot(slot)));
        }
        Ok(slot)
    }

    fn describe_slot(&self, slot: usize) -> String {
        let state = &self.arena[slot];
        match state.id {
            Some(id) => format!("{}#{id}", state.type_name),
            None => format!("{}(unsaved #{slot})", state.type_name),
        }
    }

    /// Human-readable label, e.g. `Trial_ab12…#4`.
    pub fn describe(&self, handle: EntityHandle) -> Result<String> {
        Ok(self.describe_slot(self.slot(handle)?))
    }

    pub fn id(&self, handle: EntityHandle) -> Result<Option<i32>> {
        Ok(self.arena[self.slot(handle)?].id)
    }

    pub fn type_name(&self, handle: EntityHandle) -> Result<&str> {
        Ok(&self.arena[self.slot(handle)?].type_name)
    }

    pub fn schema(&self, handle: EntityHandle) -> Result<&TypeSchema> {
        let state = &self.arena[self.slot(handle)?];
        self.registry
            .get(&state.type_name)
            .ok_or_else(|| StoreError::UnknownType(state.type_name.clone()))
    }

    pub fn is_deleted(&self, handle: EntityHandle) -> Result<bool> {
        Ok(self.arena[self.slot(handle)?].deleted)
    }

    pub fn unique_id(&self, handle: EntityHandle) -> Result<Option<&str>> {
        Ok(self.arena[self.slot(handle)?].unique_id.as_deref())
    }

    /// Set the natural key. It can be set once, before the first persist
    /// assigns a generated one.
    pub fn set_unique_id(&mut self, handle: EntityHandle, unique_id: impl Into<String>) -> Result<()> {
        let slot = self.live(handle)?;
        if self.arena[slot].unique_id.is_some() {
            return Err(StoreError::UniqueIdAlreadySet(self.describe_slot(slot)));
        }
        let state = &mut self.arena[slot];
        state.unique_id = Some(unique_id.into());
        state.row_dirty = true;
        Ok(())
    }

    pub fn view(&self, handle: EntityHandle) -> Result<EntityView<'_>> {
        let slot = self.slot(handle)?;
        let state = &self.arena[slot];
        Ok(EntityView {
            handle,
            id: state.id,
            unique_id: state.unique_id.as_deref(),
            type_name: &state.type_name,
            params: &state.params,
        })
    }

    /// Handles of every live entity currently held by the session.
    pub fn handles(&self) -> Vec<EntityHandle> {
        (0..self.arena.len())
            .filter(|slot| !self.arena[*slot].deleted)
            .map(|slot| self.handle(slot))
            .collect()
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Handle for the persisted entity `id`, loading it if needed.
    pub async fn load(&mut self, id: i32) -> Result<EntityHandle> {
        if let Some(&slot) = self.by_id.get(&id) {
            return Ok(self.handle(slot));
        }
        let row = entities::Entity::find_by_id(id)
            .one(&self.txn)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("entity {id}")))?;
        let mut handles = self.hydrate(vec![row]).await?;
        handles
            .pop()
            .ok_or_else(|| StoreError::NotFound(format!("entity {id}")))
    }

    /// Bring rows into the arena. Rows already present keep their in-memory
    /// state; the rest get their parameters loaded in one query.
    async fn hydrate(&mut self, rows: Vec<entities::Model>) -> Result<Vec<EntityHandle>> {
        let fresh: Vec<i32> = rows
            .iter()
            .map(|row| row.id)
            .filter(|id| !self.by_id.contains_key(id))
            .collect();

        let mut params: HashMap<i32, BTreeMap<String, Value>> = HashMap::new();
        if !fresh.is_empty() {
            let param_rows = parameter::Entity::find()
                .filter(parameter::Column::EntityId.is_in(fresh.iter().copied()))
                .all(&self.txn)
                .await?;
            for row in param_rows {
                let value = row.value()?;
                params
                    .entry(row.entity_id)
                    .or_default()
                    .insert(row.name, value);
            }
        }

        let mut handles = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(&slot) = self.by_id.get(&row.id) {
                handles.push(self.handle(slot));
                continue;
            }
            let state = EntityState {
                id: Some(row.id),
                unique_id: Some(row.unique_id),
                type_name: row.type_name,
                parent: row.parent_id.map_or(ParentRef::Root, ParentRef::Stored),
                params: params.remove(&row.id).unwrap_or_default(),
                row_dirty: false,
                params_dirty: false,
                deleted: false,
            };
            handles.push(self.push(state));
        }
        Ok(handles)
    }

    // ------------------------------------------------------------------
    // Persisting
    // ------------------------------------------------------------------

    /// Persist the given entities together with everything reachable from
    /// them: unsaved ancestors, in-memory children and pending associations.
    #[instrument(skip(self, handles), fields(session = %self.id, count = handles.len()))]
    pub async fn save(&mut self, handles: &[EntityHandle]) -> Result<()> {
        let mut start = Vec::with_capacity(handles.len());
        for handle in handles {
            start.push(self.live(*handle)?);
        }
        let reachable = self.reachable(start);
        self.persist(reachable).await
    }

    /// Persist every pending change held by the session.
    pub async fn flush(&mut self) -> Result<()> {
        let slots: Vec<usize> = (0..self.arena.len())
            .filter(|slot| !self.arena[*slot].deleted)
            .collect();
        self.persist(slots).await
    }

    /// Slots connected to `start` through in-memory parent edges (both
    /// directions) and pending associations.
    fn reachable(&self, start: Vec<usize>) -> Vec<usize> {
        let mut seen: HashSet<usize> = HashSet::new();
        let mut queue: VecDeque<usize> = start.into_iter().collect();

        while let Some(slot) = queue.pop_front() {
            if !seen.insert(slot) {
                continue;
            }
            if let ParentRef::Slot(parent) = self.arena[slot].parent {
                queue.push_back(parent);
            }
            for (other, state) in self.arena.iter().enumerate() {
                if !state.deleted && state.parent == ParentRef::Slot(slot) {
                    queue.push_back(other);
                }
            }
            for link in &self.links {
                if link.holder == slot {
                    queue.push_back(link.attachment);
                } else if link.attachment == slot {
                    queue.push_back(link.holder);
                }
            }
        }

        let mut slots: Vec<usize> = seen.into_iter().collect();
        slots.sort_unstable();
        slots
    }

    /// Number of in-memory parent hops until a root or a persisted parent.
    fn depth(&self, slot: usize) -> usize {
        let mut depth = 0;
        let mut current = slot;
        while let ParentRef::Slot(parent) = self.arena[current].parent {
            depth += 1;
            current = parent;
            if depth > self.arena.len() {
                break;
            }
        }
        depth
    }

    async fn persist(&mut self, mut slots: Vec<usize>) -> Result<()> {
        // Parents are written before their children.
        slots.sort_by_key(|slot| self.depth(*slot));

        let mut written = 0usize;
        for slot in slots.iter().copied() {
            if self.arena[slot].deleted {
                return Err(StoreError::StaleObject(self.describe_slot(slot)));
            }
            if self.arena[slot].needs_write() {
                self.persist_slot(slot).await?;
                written += 1;
            }
        }

        let members: HashSet<usize> = slots.into_iter().collect();
        let links_written = self.persist_links(&members).await?;
        let unlinks_written = self.persist_unlinks().await?;

        if written + links_written + unlinks_written > 0 {
            debug!(
                session = %self.id,
                entities = written,
                links = links_written,
                unlinks = unlinks_written,
                "Persisted changes"
            );
        }
        Ok(())
    }

    fn parent_id(&self, slot: usize) -> Result<Option<i32>> {
        match self.arena[slot].parent {
            ParentRef::Root => Ok(None),
            ParentRef::Stored(id) => Ok(Some(id)),
            ParentRef::Slot(parent) => self.arena[parent].id.map(Some).ok_or_else(|| {
                StoreError::DataInconsistency(format!(
                    "parent of {} was not persisted first",
                    self.describe_slot(slot)
                ))
            }),
        }
    }

    async fn persist_slot(&mut self, slot: usize) -> Result<()> {
        let parent_id = self.parent_id(slot)?;

        let id = match self.arena[slot].id {
            None => {
                let unique_id = self.arena[slot]
                    .unique_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                let inserted = entities::ActiveModel {
                    unique_id: Set(unique_id.clone()),
                    type_name: Set(self.arena[slot].type_name.clone()),
                    parent_id: Set(parent_id),
                    ..Default::default()
                }
                .insert(&self.txn)
                .await?;

                let state = &mut self.arena[slot];
                state.id = Some(inserted.id);
                state.unique_id = Some(unique_id);
                self.by_id.insert(inserted.id, slot);
                inserted.id
            }
            Some(id) => {
                let state = &self.arena[slot];
                let row_exists = if state.row_dirty {
                    let updated = entities::Entity::update_many()
                        .col_expr(entities::Column::ParentId, Expr::value(parent_id))
                        .col_expr(
                            entities::Column::UniqueId,
                            Expr::value(state.unique_id.clone()),
                        )
                        .filter(entities::Column::Id.eq(id))
                        .exec(&self.txn)
                        .await?;
                    updated.rows_affected > 0
                } else if state.params_dirty {
                    entities::Entity::find_by_id(id).count(&self.txn).await? > 0
                } else {
                    true
                };
                if !row_exists {
                    return Err(self.gone(slot));
                }
                id
            }
        };

        if self.arena[slot].params_dirty {
            parameter::Entity::delete_many()
                .filter(parameter::Column::EntityId.eq(id))
                .exec(&self.txn)
                .await?;

            let rows: Vec<parameter::ActiveModel> = self.arena[slot]
                .params
                .iter()
                .map(|(name, value)| parameter::active_model(id, name, value))
                .collect();
            if !rows.is_empty() {
                parameter::Entity::insert_many(rows)
                    .exec_without_returning(&self.txn)
                    .await?;
            }
        }

        let state = &mut self.arena[slot];
        state.row_dirty = false;
        state.params_dirty = false;
        Ok(())
    }

    /// The row behind a loaded slot disappeared underneath this session.
    fn gone(&mut self, slot: usize) -> StoreError {
        let state = &mut self.arena[slot];
        state.deleted = true;
        state.row_dirty = false;
        state.params_dirty = false;
        if let Some(id) = state.id {
            debug!(id, "Entity row deleted by another writer");
        }
        StoreError::StaleObject(self.describe_slot(slot))
    }

    async fn persist_links(&mut self, members: &HashSet<usize>) -> Result<usize> {
        let (ready, waiting): (Vec<PendingLink>, Vec<PendingLink>) =
            std::mem::take(&mut self.links).into_iter().partition(|link| {
                members.contains(&link.holder) && members.contains(&link.attachment)
            });
        self.links = waiting;

        let count = ready.len();
        for link in ready {
            let (Some(holder_id), Some(attachment_id)) =
                (self.arena[link.holder].id, self.arena[link.attachment].id)
            else {
                return Err(StoreError::DataInconsistency(format!(
                    "association '{}' references an unsaved entity",
                    link.label
                )));
            };
            context_table::ActiveModel {
                holder_id: Set(holder_id),
                attachment_id: Set(attachment_id),
                connection_type: Set(link.label),
            }
            .insert(&self.txn)
            .await?;
        }
        Ok(count)
    }

    async fn persist_unlinks(&mut self) -> Result<usize> {
        let unlinks = std::mem::take(&mut self.unlinks);
        let count = unlinks.len();
        for (holder_id, attachment_id, label) in unlinks {
            context_table::Entity::delete_many()
                .filter(context_table::Column::HolderId.eq(holder_id))
                .filter(context_table::Column::AttachmentId.eq(attachment_id))
                .filter(context_table::Column::ConnectionType.eq(label))
                .exec(&self.txn)
                .await?;
        }
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Delete an entity with its parameters, payloads and every association
    /// it takes part in. Children become roots. The handle stays valid but
    /// every later mutation or save through it fails with `StaleObject`.
    #[instrument(skip(self), fields(session = %self.id))]
    pub async fn delete(&mut self, handle: EntityHandle) -> Result<()> {
        let slot = self.live(handle)?;

        if let Some(id) = self.arena[slot].id {
            data_chunk::Entity::delete_many()
                .filter(
                    data_chunk::Column::DataId.in_subquery(
                        SeaQuery::select()
                            .column(data::Column::Id)
                            .from(data::Entity)
                            .and_where(data::Column::EntityId.eq(id))
                            .to_owned(),
                    ),
                )
                .exec(&self.txn)
                .await?;
            data::Entity::delete_many()
                .filter(data::Column::EntityId.eq(id))
                .exec(&self.txn)
                .await?;
            parameter::Entity::delete_many()
                .filter(parameter::Column::EntityId.eq(id))
                .exec(&self.txn)
                .await?;
            context_table::Entity::delete_many()
                .filter(
                    Condition::any()
                        .add(context_table::Column::HolderId.eq(id))
                        .add(context_table::Column::AttachmentId.eq(id)),
                )
                .exec(&self.txn)
                .await?;
            entities::Entity::update_many()
                .col_expr(entities::Column::ParentId, Expr::value(Option::<i32>::None))
                .filter(entities::Column::ParentId.eq(id))
                .exec(&self.txn)
                .await?;
            entities::Entity::delete_by_id(id).exec(&self.txn).await?;

            self.by_id.remove(&id);
            self.unlinks
                .retain(|(holder, attachment, _)| *holder != id && *attachment != id);
        }

        let id = self.arena[slot].id;
        for state in self.arena.iter_mut() {
            let orphaned = match state.parent {
                ParentRef::Slot(parent) => parent == slot,
                ParentRef::Stored(parent) => Some(parent) == id,
                ParentRef::Root => false,
            };
            if orphaned {
                state.parent = ParentRef::Root;
            }
        }
        self.links
            .retain(|link| link.holder != slot && link.attachment != slot);

        let state = &mut self.arena[slot];
        state.deleted = true;
        state.row_dirty = false;
        state.params_dirty = false;

        info!(entity = %self.describe_slot(slot), "Deleted entity");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Payloads
    // ------------------------------------------------------------------

    /// Payload store of an entity. An unsaved entity is persisted first,
    /// along with everything reachable from it.
    pub async fn data(&mut self, handle: EntityHandle) -> Result<ChunkedData<'_, DatabaseTransaction>> {
        let slot = self.live(handle)?;
        if self.arena[slot].id.is_none() {
            self.save(&[handle]).await?;
        }
        let id = self.arena[slot].id.ok_or(StoreError::MissingSession)?;
        Ok(ChunkedData::new(&self.txn, id, self.data_config))
    }
}

/// Validate `raw` against the declaration of `name` in `schema`.
fn coerce_param(identity: &str, schema: &TypeSchema, name: &str, raw: RawValue) -> Result<Value> {
    let kind = schema
        .kind_of(name)
        .ok_or_else(|| StoreError::UndeclaredParameter {
            type_name: identity.to_string(),
            param: name.to_string(),
        })?;
    Ok(kind.coerce(name, raw)?)
}
