mod kind;
mod value;

use serde::{Deserialize, Serialize};

use crate::error::{ParameterError, Result};

pub use kind::{DATE_FORMAT, DATETIME_FORMAT, ParameterKind, STRING_MAX_LEN, TIME_FORMAT};
pub use value::{RawValue, Value};

/// A named, typed value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
}

impl Parameter {
    pub fn kind(&self) -> ParameterKind {
        self.value.kind()
    }
}

/// Build a parameter from an untyped value, choosing the first kind in
/// [`ParameterKind::DETECTION_ORDER`] that accepts it.
pub fn create(name: impl Into<String>, raw: impl Into<RawValue>) -> Result<Parameter> {
    let name = name.into();
    let raw = raw.into();

    let kind = ParameterKind::DETECTION_ORDER
        .iter()
        .find(|kind| kind.accepts(&raw))
        .ok_or_else(|| ParameterError::NoAcceptingKind(raw.describe()))?;

    let value = kind.coerce(&name, raw)?;
    Ok(Parameter { name, value })
}

/// Parse the canonical text form of a value of `kind`.
pub fn from_string(kind: ParameterKind, text: &str) -> Result<Value> {
    kind.parse(text)
}

/// Render `value` in the canonical text form of `kind`.
pub fn to_string(kind: ParameterKind, value: &Value) -> Result<String> {
    kind.format(value)
}
