use std::collections::BTreeMap;

use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use tracing::debug;

use super::{EntityHandle, PendingLink, Session};
use crate::entity::{context as context_table, entities};
use crate::error::{Result, StoreError};

impl Session {
    /// Record a labeled association from `holder` to `attachment`.
    ///
    /// Neither side has to be persisted yet. The association is written
    /// together with its endpoints.
    pub async fn attach(
        &mut self,
        holder: EntityHandle,
        label: &str,
        attachment: EntityHandle,
    ) -> Result<()> {
        let holder_slot = self.live(holder)?;
        let attachment_slot = self.live(attachment)?;

        let link = PendingLink {
            holder: holder_slot,
            attachment: attachment_slot,
            label: label.to_string(),
        };
        if self.links.contains(&link) {
            return Err(self.duplicate(&link));
        }

        if let (Some(holder_id), Some(attachment_id)) =
            (self.arena[holder_slot].id, self.arena[attachment_slot].id)
        {
            let pending_unlink = self.unlinks.iter().position(|(h, a, l)| {
                *h == holder_id && *a == attachment_id && l == label
            });
            if let Some(index) = pending_unlink {
                self.unlinks.swap_remove(index);
                return Ok(());
            }
            if self.stored_link_exists(holder_id, attachment_id, label).await? {
                return Err(self.duplicate(&link));
            }
        }

        debug!(
            holder = %self.describe_slot(holder_slot),
            attachment = %self.describe_slot(attachment_slot),
            label,
            "Association added"
        );
        self.links.push(link);
        Ok(())
    }

    /// Remove one association. Returns `false` if it did not exist.
    pub async fn detach(
        &mut self,
        holder: EntityHandle,
        label: &str,
        attachment: EntityHandle,
    ) -> Result<bool> {
        let holder_slot = self.live(holder)?;
        let attachment_slot = self.live(attachment)?;

        let pending = self.links.iter().position(|link| {
            link.holder == holder_slot && link.attachment == attachment_slot && link.label == label
        });
        if let Some(index) = pending {
            self.links.remove(index);
            return Ok(true);
        }

        let (Some(holder_id), Some(attachment_id)) =
            (self.arena[holder_slot].id, self.arena[attachment_slot].id)
        else {
            return Ok(false);
        };
        let already = self
            .unlinks
            .iter()
            .any(|(h, a, l)| *h == holder_id && *a == attachment_id && l == label);
        if already || !self.stored_link_exists(holder_id, attachment_id, label).await? {
            return Ok(false);
        }
        self.unlinks
            .push((holder_id, attachment_id, label.to_string()));
        Ok(true)
    }

    /// Entities attached to `handle`, optionally only under `label`.
    pub async fn attachments(
        &mut self,
        handle: EntityHandle,
        label: Option<&str>,
    ) -> Result<Vec<EntityHandle>> {
        Ok(self
            .linked(handle, label, true)
            .await?
            .into_iter()
            .map(|(_, h)| h)
            .collect())
    }

    /// Entities holding `handle` as an attachment, optionally only under
    /// `label`.
    pub async fn holders(
        &mut self,
        handle: EntityHandle,
        label: Option<&str>,
    ) -> Result<Vec<EntityHandle>> {
        Ok(self
            .linked(handle, label, false)
            .await?
            .into_iter()
            .map(|(_, h)| h)
            .collect())
    }

    /// Attachments grouped by label.
    pub async fn context(
        &mut self,
        handle: EntityHandle,
    ) -> Result<BTreeMap<String, Vec<EntityHandle>>> {
        let mut grouped: BTreeMap<String, Vec<EntityHandle>> = BTreeMap::new();
        for (label, other) in self.linked(handle, None, true).await? {
            grouped.entry(label).or_default().push(other);
        }
        Ok(grouped)
    }

    fn duplicate(&self, link: &PendingLink) -> StoreError {
        StoreError::DuplicateAssociation {
            holder: self.describe_slot(link.holder),
            attachment: self.describe_slot(link.attachment),
            connection_type: link.label.clone(),
        }
    }

    async fn stored_link_exists(&self, holder_id: i32, attachment_id: i32, label: &str) -> Result<bool> {
        let count = context_table::Entity::find()
            .filter(context_table::Column::HolderId.eq(holder_id))
            .filter(context_table::Column::AttachmentId.eq(attachment_id))
            .filter(context_table::Column::ConnectionType.eq(label))
            .count(&self.txn)
            .await?;
        Ok(count > 0)
    }

    /// Persisted and pending associations on one side of `handle`, as
    /// (label, other endpoint) pairs.
    async fn linked(
        &mut self,
        handle: EntityHandle,
        label: Option<&str>,
        outgoing: bool,
    ) -> Result<Vec<(String, EntityHandle)>> {
        let slot = self.live(handle)?;
        let mut out = Vec::new();

        if let Some(id) = self.arena[slot].id {
            let (own, other) = if outgoing {
                (context_table::Column::HolderId, context_table::Column::AttachmentId)
            } else {
                (context_table::Column::AttachmentId, context_table::Column::HolderId)
            };
            let mut query = context_table::Entity::find()
                .filter(own.eq(id))
                .order_by_asc(context_table::Column::ConnectionType)
                .order_by_asc(other);
            if let Some(label) = label {
                query = query.filter(context_table::Column::ConnectionType.eq(label));
            }

            let rows: Vec<(String, i32)> = query
                .all(&self.txn)
                .await?
                .into_iter()
                .filter(|row| {
                    !self.unlinks.iter().any(|(h, a, l)| {
                        *h == row.holder_id && *a == row.attachment_id && *l == row.connection_type
                    })
                })
                .map(|row| {
                    let other_id = if outgoing { row.attachment_id } else { row.holder_id };
                    (row.connection_type, other_id)
                })
                .collect();

            let ids: Vec<i32> = rows.iter().map(|(_, id)| *id).collect();
            let entity_rows = entities::Entity::find()
                .filter(entities::Column::Id.is_in(ids))
                .all(&self.txn)
                .await?;
            self.hydrate(entity_rows).await?;

            for (label, other_id) in rows {
                if let Some(&other_slot) = self.by_id.get(&other_id) {
                    out.push((label, self.handle(other_slot)));
                }
            }
        }

        for link in &self.links {
            let (own, other) = if outgoing {
                (link.holder, link.attachment)
            } else {
                (link.attachment, link.holder)
            };
            if own == slot && label.is_none_or(|l| l == link.label) {
                out.push((link.label.clone(), self.handle(other)));
            }
        }
        Ok(out)
    }
}
