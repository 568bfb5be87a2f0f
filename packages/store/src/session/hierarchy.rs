use std::collections::{HashSet, VecDeque};

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use tracing::debug;

use super::{EntityHandle, ParentRef, Session};
use crate::entity::entities;
use crate::error::{Result, StoreError};

impl Session {
    /// Arena slot of the parent, loading a persisted parent on first use.
    pub(super) async fn parent_slot(&mut self, slot: usize) -> Result<Option<usize>> {
        match self.arena[slot].parent {
            ParentRef::Root => Ok(None),
            ParentRef::Slot(parent) => Ok(Some(parent)),
            ParentRef::Stored(id) => {
                let handle = self.load(id).await?;
                self.arena[slot].parent = ParentRef::Slot(handle.slot);
                Ok(Some(handle.slot))
            }
        }
    }

    pub async fn parent(&mut self, handle: EntityHandle) -> Result<Option<EntityHandle>> {
        let slot = self.slot(handle)?;
        Ok(self
            .parent_slot(slot)
            .await?
            .map(|parent| self.handle(parent)))
    }

    /// Direct children, ordered by id. Pending changes are flushed first.
    pub async fn children(&mut self, handle: EntityHandle) -> Result<Vec<EntityHandle>> {
        let slot = self.live(handle)?;
        self.flush().await?;
        let Some(id) = self.arena[slot].id else {
            return Ok(Vec::new());
        };

        let rows = entities::Entity::find()
            .filter(entities::Column::ParentId.eq(id))
            .order_by_asc(entities::Column::Id)
            .all(&self.txn)
            .await?;
        self.hydrate(rows).await
    }

    /// Make `parent` the parent of `child`, or turn `child` into a root.
    ///
    /// Fails without any change if the new edge would close a cycle.
    pub async fn set_parent(
        &mut self,
        child: EntityHandle,
        parent: Option<EntityHandle>,
    ) -> Result<()> {
        let child_slot = self.live(child)?;

        let new_parent = match parent {
            None => ParentRef::Root,
            Some(parent) => {
                let parent_slot = self.live(parent)?;
                let mut visited = HashSet::new();
                let mut current = Some(parent_slot);
                while let Some(slot) = current {
                    if slot == child_slot {
                        return Err(StoreError::CircularReference {
                            child: self.describe_slot(child_slot),
                            parent: self.describe_slot(parent_slot),
                        });
                    }
                    if !visited.insert(slot) {
                        return Err(StoreError::DataInconsistency(format!(
                            "existing cycle above {}",
                            self.describe_slot(parent_slot)
                        )));
                    }
                    current = self.parent_slot(slot).await?;
                }
                ParentRef::Slot(parent_slot)
            }
        };

        let state = &mut self.arena[child_slot];
        if state.parent != new_parent {
            state.parent = new_parent;
            state.row_dirty = true;
            debug!(child = %self.describe_slot(child_slot), "Parent reassigned");
        }
        Ok(())
    }

    /// Ancestors from the direct parent up to the root.
    pub async fn ancestors(&mut self, handle: EntityHandle) -> Result<Vec<EntityHandle>> {
        let start = self.slot(handle)?;
        let mut visited = HashSet::from([start]);
        let mut chain = Vec::new();
        let mut current = self.parent_slot(start).await?;

        while let Some(slot) = current {
            if !visited.insert(slot) {
                return Err(StoreError::DataInconsistency(format!(
                    "parent chain of {} loops",
                    self.describe_slot(start)
                )));
            }
            chain.push(self.handle(slot));
            current = self.parent_slot(slot).await?;
        }
        Ok(chain)
    }

    /// Every entity below `handle`, breadth first.
    pub async fn descendants(&mut self, handle: EntityHandle) -> Result<Vec<EntityHandle>> {
        let mut seen = HashSet::from([self.live(handle)?]);
        let mut queue = VecDeque::from([handle]);
        let mut out = Vec::new();

        while let Some(next) = queue.pop_front() {
            for child in self.children(next).await? {
                if seen.insert(child.slot) {
                    out.push(child);
                    queue.push_back(child);
                }
            }
        }
        Ok(out)
    }
}
