use thiserror::Error;

use crate::param::ParameterKind;

/// Errors raised while validating, converting or declaring parameter values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("Type mismatch: parameter '{name}' of kind {expected} cannot hold {found}")]
    TypeMismatch {
        name: String,
        expected: ParameterKind,
        found: String,
    },

    #[error("No parameter kind accepts {0}")]
    NoAcceptingKind(String),

    #[error("Cannot convert '{text}' to {kind}")]
    StringConversion { kind: ParameterKind, text: String },

    #[error("String of {actual} characters exceeds the limit of {limit}")]
    StringTooLong { actual: usize, limit: usize },

    #[error("Unknown parameter kind: {0}")]
    UnknownKind(String),

    #[error("Invalid type definition: {0}")]
    InvalidType(String),
}

pub type Result<T> = std::result::Result<T, ParameterError>;
