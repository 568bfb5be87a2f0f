use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A binary payload stored under `key` for one entity. The bytes live in
/// `data_chunk`.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "data")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique_key = "entity_data_key")]
    pub entity_id: i32,
    #[sea_orm(belongs_to, from = "entity_id", to = "id")]
    pub entity: HasOne<super::entities::Entity>,

    #[sea_orm(unique_key = "entity_data_key")]
    pub key: String,

    pub mimetype: Option<String>,

    /// Total byte count recorded by the last complete `put`.
    pub length: Option<i64>,

    #[sea_orm(has_many)]
    pub chunks: HasMany<super::data_chunk::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
