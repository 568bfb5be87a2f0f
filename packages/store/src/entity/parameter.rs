use common::{ParameterKind, Value};
use sea_orm::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// One typed value of one entity. Exactly the slot selected by `kind` is
/// populated.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "parameter")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique_key = "entity_parameter_name")]
    pub entity_id: i32,
    #[sea_orm(belongs_to, from = "entity_id", to = "id")]
    pub entity: HasOne<super::entities::Entity>,

    #[sea_orm(unique_key = "entity_parameter_name")]
    pub name: String,

    pub kind: ParameterKind,

    pub value_string: Option<String>,
    pub value_integer: Option<i64>,
    pub value_float: Option<f64>,
    pub value_date: Option<Date>,
    pub value_time: Option<Time>,
    pub value_datetime: Option<DateTime>,
    pub value_boolean: Option<bool>,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Read the populated slot back into a typed value.
    pub fn value(&self) -> Result<Value, StoreError> {
        let value = match self.kind {
            ParameterKind::String => self.value_string.clone().map(Value::String),
            ParameterKind::Integer => self.value_integer.map(Value::Integer),
            ParameterKind::Float => self.value_float.map(Value::Float),
            ParameterKind::Date => self.value_date.map(Value::Date),
            ParameterKind::Time => self.value_time.map(Value::Time),
            ParameterKind::DateTime => self.value_datetime.map(Value::DateTime),
            ParameterKind::Boolean => self.value_boolean.map(Value::Boolean),
        };
        value.ok_or_else(|| {
            StoreError::DataInconsistency(format!(
                "parameter '{}' of entity {} has no {} value",
                self.name, self.entity_id, self.kind
            ))
        })
    }
}

/// Column holding values of `kind`.
pub fn value_column(kind: ParameterKind) -> Column {
    match kind {
        ParameterKind::String => Column::ValueString,
        ParameterKind::Integer => Column::ValueInteger,
        ParameterKind::Float => Column::ValueFloat,
        ParameterKind::Date => Column::ValueDate,
        ParameterKind::Time => Column::ValueTime,
        ParameterKind::DateTime => Column::ValueDatetime,
        ParameterKind::Boolean => Column::ValueBoolean,
    }
}

/// Build an insertable row for `value`, leaving every other slot NULL.
pub fn active_model(entity_id: i32, name: &str, value: &Value) -> ActiveModel {
    let mut model = ActiveModel {
        entity_id: Set(entity_id),
        name: Set(name.to_string()),
        kind: Set(value.kind()),
        value_string: Set(None),
        value_integer: Set(None),
        value_float: Set(None),
        value_date: Set(None),
        value_time: Set(None),
        value_datetime: Set(None),
        value_boolean: Set(None),
        ..Default::default()
    };

    match value {
        Value::String(s) => model.value_string = Set(Some(s.clone())),
        Value::Integer(i) => model.value_integer = Set(Some(*i)),
        Value::Float(f) => model.value_float = Set(Some(*f)),
        Value::Date(d) => model.value_date = Set(Some(*d)),
        Value::Time(t) => model.value_time = Set(Some(*t)),
        Value::DateTime(dt) => model.value_datetime = Set(Some(*dt)),
        Value::Boolean(b) => model.value_boolean = Set(Some(*b)),
    }

    model
}
