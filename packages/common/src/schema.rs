use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ParameterError, Result};
use crate::param::ParameterKind;

/// Number of hex characters of the schema digest kept in a stored identity.
pub const HASH_LEN: usize = 32;

/// A named declaration of parameter names and their kinds.
///
/// The stored identity of a schema is `Name_<hash>`, where the hash covers
/// the declared parameters. Two schemas sharing a name but declaring
/// different parameters therefore never collide.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSchema {
    name: String,
    params: BTreeMap<String, ParameterKind>,
}

impl TypeSchema {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_type_name(&name)?;
        Ok(Self {
            name,
            params: BTreeMap::new(),
        })
    }

    /// Builder form of [`TypeSchema::declare`].
    pub fn with_param(mut self, name: impl Into<String>, kind: ParameterKind) -> Result<Self> {
        self.declare(name, kind)?;
        Ok(self)
    }

    pub fn declare(&mut self, name: impl Into<String>, kind: ParameterKind) -> Result<()> {
        let name = name.into();
        validate_param_name(&name)?;
        self.params.insert(name, kind);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &BTreeMap<String, ParameterKind> {
        &self.params
    }

    pub fn kind_of(&self, param: &str) -> Option<ParameterKind> {
        self.params.get(param).copied()
    }

    pub fn declares(&self, param: &str) -> bool {
        self.params.contains_key(param)
    }

    /// Hex digest of the declared parameters, truncated to [`HASH_LEN`].
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, kind) in &self.params {
            hasher.update(name.as_bytes());
            hasher.update(b":");
            hasher.update(kind.as_str().as_bytes());
            hasher.update(b"\n");
        }
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(HASH_LEN);
        digest
    }

    /// Identity under which this schema is stored: `Name_<hash>`.
    pub fn identity(&self) -> String {
        format!("{}_{}", self.name, self.hash())
    }

    /// Rebuild a schema from a stored identity and its declarations.
    ///
    /// Fails if the identity is malformed or the declarations do not hash to
    /// the identity's suffix.
    pub fn from_declarations(
        identity: &str,
        params: impl IntoIterator<Item = (String, ParameterKind)>,
    ) -> Result<Self> {
        let (name, hash) = split_identity(identity)?;
        let mut schema = Self::new(name)?;
        for (param, kind) in params {
            schema.declare(param, kind)?;
        }
        if schema.hash() != hash {
            return Err(ParameterError::InvalidType(format!(
                "declarations of '{identity}' do not match its hash"
            )));
        }
        Ok(schema)
    }
}

impl fmt::Display for TypeSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Split a stored identity `Name_<hash>` into its name and hash.
pub fn split_identity(identity: &str) -> Result<(&str, &str)> {
    let invalid = || ParameterError::InvalidType(format!("'{identity}' is not a stored type identity"));

    let (name, hash) = identity.split_once('_').ok_or_else(invalid)?;
    if hash.len() != HASH_LEN || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    validate_type_name(name)?;
    Ok((name, hash))
}

/// Type names are alphanumeric and start with a letter. Underscores are
/// reserved as the separator of the stored identity.
pub fn validate_type_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(ParameterError::InvalidType(format!(
            "type name '{name}' must be alphanumeric, start with a letter and contain no underscore"
        )))
    }
}

/// Parameter names may not start with an underscore; that prefix addresses
/// entity attributes in filters.
fn validate_param_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ParameterError::InvalidType(format!(
            "parameter name '{name}' is not a valid identifier"
        )))
    }
}
