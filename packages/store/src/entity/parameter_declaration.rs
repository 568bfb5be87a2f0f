use common::ParameterKind;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Durable lookup `(type identity, parameter name) -> kind`.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "parameter_declaration")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub entity_name: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub parameter_name: String,

    pub parameter_type: ParameterKind,
}

impl ActiveModelBehavior for ActiveModel {}
