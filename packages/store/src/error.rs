use common::ParameterError;
use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// Errors raised by the store.
///
/// Validation errors (`Parameter`, `UndeclaredParameter`, `CircularReference`,
/// `DuplicateAssociation`, ...) are raised at the call that caused them,
/// before anything is written. `Conflict` and `Backend` originate in the
/// database and are never retried here.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kind mismatch, string conversion failure, missing accepting kind or
    /// malformed type definition.
    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error("Parameter '{param}' is not declared for type {type_name}")]
    UndeclaredParameter { type_name: String, param: String },

    #[error("Unknown parameter '{param}' in filter on type {type_name}")]
    UnknownParameter { type_name: String, param: String },

    #[error("Setting {parent} as parent of {child} would create a cycle")]
    CircularReference { child: String, parent: String },

    #[error("Association {holder} -> {attachment} labeled '{connection_type}' already exists")]
    DuplicateAssociation {
        holder: String,
        attachment: String,
        connection_type: String,
    },

    #[error("Data inconsistency: {0}")]
    DataInconsistency(String),

    #[error("Entity {0} has been deleted")]
    StaleObject(String),

    #[error("Entity handle does not belong to this session")]
    MissingSession,

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Type name '{name}' is ambiguous, candidates: {}", candidates.join(", "))]
    AmbiguousType {
        name: String,
        candidates: Vec<String>,
    },

    #[error("unique_id of entity {0} is already set")]
    UniqueIdAlreadySet(String),

    #[error("Invalid filter: {0}")]
    Filter(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint rejected the write, e.g. two sessions racing
    /// on the same association or unique_id.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Backend(DbErr),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True for errors produced by a backend uniqueness constraint.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => StoreError::Conflict(detail),
            _ => StoreError::Backend(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
