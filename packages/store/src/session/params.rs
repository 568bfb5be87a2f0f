use std::collections::BTreeMap;
use std::collections::btree_map;

use common::{RawValue, Value};

use super::{EntityHandle, Session, coerce_param};
use crate::error::{Result, StoreError};

/// Parameters resolved along the parent chain: for every name, the value of
/// the nearest entity that defines it, starting with the entity itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InheritedParams {
    values: BTreeMap<String, Value>,
}

impl InheritedParams {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<'a> IntoIterator for &'a InheritedParams {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

impl Session {
    /// Assign a declared parameter. The value is checked against the
    /// declared kind before anything is buffered.
    pub fn set_param(
        &mut self,
        handle: EntityHandle,
        name: &str,
        value: impl Into<RawValue>,
    ) -> Result<()> {
        let slot = self.live(handle)?;
        let identity = self.arena[slot].type_name.as_str();
        let schema = self
            .registry
            .get(identity)
            .ok_or_else(|| StoreError::UnknownType(identity.to_string()))?;
        let value = coerce_param(identity, schema, name, value.into())?;

        let state = &mut self.arena[slot];
        state.params.insert(name.to_string(), value);
        state.params_dirty = true;
        Ok(())
    }

    /// Assign a parameter from its canonical text form.
    pub fn set_param_str(&mut self, handle: EntityHandle, name: &str, text: &str) -> Result<()> {
        let kind = self.declared_kind(handle, name)?;
        let value = kind.parse(text)?;
        self.set_param(handle, name, value)
    }

    /// Unset a declared parameter, returning its previous value.
    pub fn remove_param(&mut self, handle: EntityHandle, name: &str) -> Result<Option<Value>> {
        self.declared_kind(handle, name)?;
        let slot = self.live(handle)?;
        let state = &mut self.arena[slot];
        let previous = state.params.remove(name);
        if previous.is_some() {
            state.params_dirty = true;
        }
        Ok(previous)
    }

    fn declared_kind(&self, handle: EntityHandle, name: &str) -> Result<common::ParameterKind> {
        let slot = self.live(handle)?;
        let identity = &self.arena[slot].type_name;
        self.schema(handle)?
            .kind_of(name)
            .ok_or_else(|| StoreError::UndeclaredParameter {
                type_name: identity.clone(),
                param: name.to_string(),
            })
    }

    pub fn param(&self, handle: EntityHandle, name: &str) -> Result<Option<&Value>> {
        Ok(self.arena[self.slot(handle)?].params.get(name))
    }

    /// Parameters set on the entity itself.
    pub fn params(&self, handle: EntityHandle) -> Result<&BTreeMap<String, Value>> {
        Ok(&self.arena[self.slot(handle)?].params)
    }

    /// Every parameter in its canonical text form.
    pub fn str_params(&self, handle: EntityHandle) -> Result<BTreeMap<String, String>> {
        self.params(handle)?
            .iter()
            .map(|(name, value)| Ok((name.clone(), value.kind().format(value)?)))
            .collect()
    }

    /// Parameters as a JSON object. Numbers and booleans stay native.
    pub fn json_params(&self, handle: EntityHandle) -> Result<serde_json::Map<String, serde_json::Value>> {
        Ok(self
            .params(handle)?
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect())
    }

    /// Parameters of the entity merged with those of its ancestors; the
    /// nearest definition of each name wins.
    pub async fn inherited_params(&mut self, handle: EntityHandle) -> Result<InheritedParams> {
        let mut chain = self.ancestors(handle).await?;
        chain.reverse();
        chain.push(handle);

        let mut values = BTreeMap::new();
        for entity in chain {
            for (name, value) in self.params(entity)? {
                values.insert(name.clone(), value.clone());
            }
        }
        Ok(InheritedParams { values })
    }

    /// Parameters of the entity whose value differs from, or is missing in,
    /// what it inherits from its parent.
    pub async fn unique_params(&mut self, handle: EntityHandle) -> Result<BTreeMap<String, Value>> {
        let inherited = match self.parent(handle).await? {
            Some(parent) => self.inherited_params(parent).await?,
            None => InheritedParams::default(),
        };

        Ok(self
            .params(handle)?
            .iter()
            .filter(|(name, value)| inherited.get(name) != Some(*value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect())
    }
}
