use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "data_chunk")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique_key = "data_chunk_index")]
    pub data_id: i32,
    #[sea_orm(belongs_to, from = "data_id", to = "id")]
    pub data: HasOne<super::data::Entity>,

    /// 1-based position of this chunk within the payload.
    #[sea_orm(unique_key = "data_chunk_index")]
    pub chunk_index: i32,

    pub length: i64,

    pub bytes: Vec<u8>,
}

impl ActiveModelBehavior for ActiveModel {}
