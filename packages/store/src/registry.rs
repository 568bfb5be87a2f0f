use std::collections::BTreeMap;

use common::{ParameterKind, TypeSchema};
use common::schema::split_identity;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, Set};
use tracing::{debug, info};

use crate::entity::parameter_declaration;
use crate::error::{Result, StoreError};

/// In-memory map of declared types, keyed by stored identity (`Name_<hash>`).
///
/// Created once at startup and shared by handle; sessions take a snapshot
/// when they begin.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, TypeSchema>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a schema and return its identity. Re-adding an identical schema
    /// is a no-op.
    pub fn insert(&mut self, schema: TypeSchema) -> String {
        let identity = schema.identity();
        self.types.entry(identity.clone()).or_insert(schema);
        identity
    }

    pub fn get(&self, identity: &str) -> Option<&TypeSchema> {
        self.types.get(identity)
    }

    /// Resolve a type by its exact identity or by a bare name that matches
    /// exactly one registered identity.
    pub fn entity_by_name(&self, name: &str) -> Result<(&str, &TypeSchema)> {
        if let Some((identity, schema)) = self.types.get_key_value(name) {
            return Ok((identity.as_str(), schema));
        }

        let candidates: Vec<(&String, &TypeSchema)> = self
            .types
            .iter()
            .filter(|(_, schema)| schema.name() == name)
            .collect();

        match candidates.as_slice() {
            [] => Err(StoreError::UnknownType(name.to_string())),
            [(identity, schema)] => Ok((identity.as_str(), *schema)),
            many => Err(StoreError::AmbiguousType {
                name: name.to_string(),
                candidates: many.iter().map(|(identity, _)| identity.to_string()).collect(),
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypeSchema)> {
        self.types.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Parameter name of the row that records a type declaring no parameters.
/// Never a valid parameter name.
const NO_PARAMS: &str = "";

/// Record a schema's declarations in `parameter_declaration`.
///
/// Existing rows are left untouched, so registering an unchanged schema
/// twice is idempotent. Returns the stored identity.
pub async fn persist_schema<C: ConnectionTrait>(conn: &C, schema: &TypeSchema) -> Result<String> {
    let identity = schema.identity();
    let mut inserted = 0u32;

    let declarations: Vec<(String, ParameterKind)> = if schema.params().is_empty() {
        vec![(NO_PARAMS.to_string(), ParameterKind::String)]
    } else {
        schema
            .params()
            .iter()
            .map(|(param, kind)| (param.clone(), *kind))
            .collect()
    };

    for (param, kind) in declarations {
        let model = parameter_declaration::ActiveModel {
            entity_name: Set(identity.clone()),
            parameter_name: Set(param),
            parameter_type: Set(kind),
        };

        let result = parameter_declaration::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([
                    parameter_declaration::Column::EntityName,
                    parameter_declaration::Column::ParameterName,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(conn)
            .await;

        match result {
            Ok(_) => inserted += 1,
            Err(DbErr::RecordNotInserted) => {}
            Err(e) => return Err(e.into()),
        }
    }

    if inserted > 0 {
        info!(identity = %identity, declarations = inserted, "Registered type");
    } else {
        debug!(identity = %identity, "Type already registered");
    }
    Ok(identity)
}

/// Rebuild every schema recorded in `parameter_declaration`.
pub async fn types_from_db<C: ConnectionTrait>(conn: &C) -> Result<Vec<TypeSchema>> {
    let rows = parameter_declaration::Entity::find()
        .order_by_asc(parameter_declaration::Column::EntityName)
        .order_by_asc(parameter_declaration::Column::ParameterName)
        .all(conn)
        .await?;

    let mut grouped: BTreeMap<String, Vec<(String, ParameterKind)>> = BTreeMap::new();
    for row in rows {
        let params = grouped.entry(row.entity_name).or_default();
        if row.parameter_name != NO_PARAMS {
            params.push((row.parameter_name, row.parameter_type));
        }
    }

    grouped
        .into_iter()
        .map(|(identity, params)| Ok(TypeSchema::from_declarations(&identity, params)?))
        .collect()
}

/// Whether the stored declarations under `schema`'s identity are exactly
/// the ones `schema` declares.
pub async fn is_consistent<C: ConnectionTrait>(conn: &C, schema: &TypeSchema) -> Result<bool> {
    let identity = schema.identity();
    split_identity(&identity)?;

    let rows = parameter_declaration::Entity::find()
        .filter(parameter_declaration::Column::EntityName.eq(identity.as_str()))
        .all(conn)
        .await?;

    if rows.is_empty() {
        return Ok(false);
    }
    let stored: BTreeMap<String, ParameterKind> = rows
        .into_iter()
        .filter(|row| row.parameter_name != NO_PARAMS)
        .map(|row| (row.parameter_name, row.parameter_type))
        .collect();

    Ok(&stored == schema.params())
}
