use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Labeled, directed edge from a holder entity to an attachment entity.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "context")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub holder_id: i32,
    #[sea_orm(primary_key, auto_increment = false)]
    pub attachment_id: i32,
    #[sea_orm(primary_key, auto_increment = false)]
    pub connection_type: String,
}

impl ActiveModelBehavior for ActiveModel {}
