use std::fmt;
use std::sync::Arc;

use common::RawValue;

use super::filter::{Criterion, Filter};
use crate::error::{Result, StoreError};
use crate::session::EntityView;

/// Caller-supplied test on a whole entity.
pub type EntityTest = Arc<dyn Fn(&EntityView<'_>) -> bool + Send + Sync>;

/// A boolean search tree, evaluated per candidate entity.
#[derive(Clone)]
pub enum Predicate {
    /// True if any inner predicate holds. Evaluated left to right, stops at
    /// the first success.
    Any(Vec<Predicate>),
    /// True if every inner predicate holds. Evaluated left to right, stops
    /// at the first failure.
    All(Vec<Predicate>),
    /// Holds for the parent. False for roots.
    Parent(Box<Predicate>),
    /// Holds for at least one child.
    Child(Box<Predicate>),
    With(EntityTest),
    Param(String, Criterion),
    /// The entity is of the named type and the inner predicate holds.
    Entity(String, Box<Predicate>),
}

impl Predicate {
    pub fn any(items: impl IntoIterator<Item = Predicate>) -> Self {
        Self::Any(items.into_iter().collect())
    }

    pub fn all(items: impl IntoIterator<Item = Predicate>) -> Self {
        Self::All(items.into_iter().collect())
    }

    pub fn parent(inner: Predicate) -> Self {
        Self::Parent(Box::new(inner))
    }

    pub fn child(inner: Predicate) -> Self {
        Self::Child(Box::new(inner))
    }

    pub fn with<F>(test: F) -> Self
    where
        F: Fn(&EntityView<'_>) -> bool + Send + Sync + 'static,
    {
        Self::With(Arc::new(test))
    }

    pub fn param(key: impl Into<String>, criterion: impl Into<Criterion>) -> Self {
        Self::Param(key.into(), criterion.into())
    }

    pub fn entity(type_name: impl Into<String>, inner: Predicate) -> Self {
        Self::Entity(type_name.into(), Box::new(inner))
    }

    /// Predicate that always holds.
    pub fn always() -> Self {
        Self::All(Vec::new())
    }

    /// `All` over one `Param` per filter entry.
    pub fn from_filter(filter: &Filter) -> Self {
        Self::All(
            filter
                .iter()
                .map(|(k, c)| Self::Param(k.to_string(), c.clone()))
                .collect(),
        )
    }

    /// Build a tree from its JSON literal form.
    ///
    /// - `{"ANY": [...]}`, `{"ALL": [...]}`, `{"PARENT": {...}}` and
    ///   `{"CHILD": {...}}` are combinators.
    /// - Any other key with an object value is an entity node:
    ///   `{"Trial": {...}}`.
    /// - A key with a scalar value is an equality test, with an array of
    ///   scalars it is a test against any of them.
    /// - An object with several keys is the `ALL` of its entries; an array is
    ///   the `ALL` of its items.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(map) => {
                let mut items = map
                    .iter()
                    .map(|(key, value)| Self::entry_from_json(key, value))
                    .collect::<Result<Vec<_>>>()?;
                if items.len() == 1 {
                    Ok(items.remove(0))
                } else {
                    Ok(Self::All(items))
                }
            }
            serde_json::Value::Array(items) => Ok(Self::All(
                items.iter().map(Self::from_json).collect::<Result<_>>()?,
            )),
            other => Err(StoreError::Filter(format!(
                "expected an object or array, got {other}"
            ))),
        }
    }

    fn entry_from_json(key: &str, value: &serde_json::Value) -> Result<Self> {
        let list = |value: &serde_json::Value| -> Result<Vec<Predicate>> {
            match value {
                serde_json::Value::Array(items) => items.iter().map(Self::from_json).collect(),
                serde_json::Value::Object(map) => map
                    .iter()
                    .map(|(k, v)| Self::entry_from_json(k, v))
                    .collect(),
                other => Err(StoreError::Filter(format!(
                    "'{key}' expects a list, got {other}"
                ))),
            }
        };

        match key {
            "ANY" | "_any" => Ok(Self::Any(list(value)?)),
            "ALL" | "_all" => Ok(Self::All(list(value)?)),
            "PARENT" | "_parent" => Ok(Self::parent(Self::from_json(value)?)),
            "CHILD" | "_child" => Ok(Self::child(Self::from_json(value)?)),
            _ => match value {
                serde_json::Value::Object(_) => Ok(Self::entity(key, Self::from_json(value)?)),
                serde_json::Value::Array(items) => Ok(Self::param(
                    key,
                    Criterion::AnyOf(
                        items
                            .iter()
                            .map(|v| Criterion::Eq(RawValue::from_json(v)))
                            .collect(),
                    ),
                )),
                scalar => Ok(Self::param(key, RawValue::from_json(scalar))),
            },
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any(items) => f.debug_tuple("Any").field(items).finish(),
            Self::All(items) => f.debug_tuple("All").field(items).finish(),
            Self::Parent(inner) => f.debug_tuple("Parent").field(inner).finish(),
            Self::Child(inner) => f.debug_tuple("Child").field(inner).finish(),
            Self::With(_) => f.write_str("With(<fn>)"),
            Self::Param(key, criterion) => f.debug_tuple("Param").field(key).field(criterion).finish(),
            Self::Entity(name, inner) => f.debug_tuple("Entity").field(name).field(inner).finish(),
        }
    }
}
