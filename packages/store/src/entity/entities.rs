use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One stored entity. Its parameters, payloads and context edges live in
/// their own tables keyed by `id`.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "entities")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Natural key. Generated as a UUIDv4 when the caller supplies none.
    #[sea_orm(unique)]
    pub unique_id: String,

    /// Stored type identity, `Name_<hash>`.
    #[sea_orm(indexed)]
    pub type_name: String,

    /// NULL for roots.
    #[sea_orm(indexed)]
    pub parent_id: Option<i32>,

    #[sea_orm(has_many)]
    pub parameters: HasMany<super::parameter::Entity>,

    #[sea_orm(has_many)]
    pub data: HasMany<super::data::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
