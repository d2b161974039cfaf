//! Domain model types shared by the parser, the mapping store and the
//! provider.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

// ---------------------------------------------------------------------------
// Configuration entry
// ---------------------------------------------------------------------------

/// A remote-connection configuration: a protocol plus its parameters.
///
/// The protocol is fixed at construction and is never empty. `Clone` yields a
/// fully independent copy, which is what callers receive from resolution so
/// they can substitute placeholder values without touching the cached
/// original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigurationEntry {
    protocol: String,
    parameters: HashMap<String, String>,
}

impl ConfigurationEntry {
    /// Create an entry for `protocol` with no parameters.
    pub fn new(protocol: impl Into<String>) -> Result<Self, ValidationError> {
        let protocol = protocol.into();
        if protocol.is_empty() {
            return Err(ValidationError::EmptyProtocol);
        }
        Ok(Self {
            protocol,
            parameters: HashMap::new(),
        })
    }

    /// The protocol identifier, e.g. `rdp` or `ssh`.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Set a parameter, replacing any previous value under the same name.
    pub fn set_parameter(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ValidationError> {
        let name = name.into();
        let value = value.into();
        if name.is_empty() {
            return Err(ValidationError::EmptyParameterName);
        }
        if value.is_empty() {
            return Err(ValidationError::EmptyParameterValue(name));
        }
        self.parameters.insert(name, value);
        Ok(())
    }

    /// Look up a single parameter value.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }
}

// ---------------------------------------------------------------------------
// Principals
// ---------------------------------------------------------------------------

/// A user or group that holds configuration references.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Principal {
    User(String),
    Group(String),
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(name) => write!(f, "user '{}'", name),
            Self::Group(name) => write!(f, "group '{}'", name),
        }
    }
}

// ---------------------------------------------------------------------------
// Unresolved references
// ---------------------------------------------------------------------------

/// Warning: one or more principals reference a configuration that the
/// document never defines. Such references are dropped during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedReference {
    /// The configuration name that has no definition.
    pub config_name: String,
    /// Every user and group referencing it, sorted.
    pub referenced_by: Vec<Principal>,
}

impl std::fmt::Display for UnresolvedReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown config '{}' referenced by ", self.config_name)?;
        for (i, principal) in self.referenced_by.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", principal)?;
        }
        Ok(())
    }
}
