//! Capability grants and their delegation encoding
//!
//! A session credential delegates a set of (resource, ability) pairs to an
//! ephemeral session key. Resources use a `protocol://identifier` shape
//! (`conclave-key://8f3b…`), with `*` as the identifier acting as a
//! wildcard over that protocol. The delegation encoding embedded in the
//! signed session message is sorted and deduplicated so any node can
//! re-derive it independently for verification.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Closed enumeration of abilities a grant can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ability {
    /// Produce signature shares over a message
    Signing,
    /// Produce plaintext candidates for sealed material
    Decryption,
    /// Run a remote program and return its output
    Execution,
}

impl Ability {
    /// Stable wire name, shared with node-side verification.
    pub fn as_str(&self) -> &'static str {
        match self {
            Ability::Signing => "sign",
            Ability::Decryption => "decrypt",
            Ability::Execution => "execute",
        }
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One permitted action: an ability over a resource pattern.
///
/// Order within a grant set is irrelevant and duplicates are harmless; the
/// delegation encoding normalizes both away.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CapabilityGrant {
    /// Resource pattern, `protocol://identifier` with `*` as wildcard
    pub resource: String,
    /// Ability granted over the resource
    pub ability: Ability,
}

impl CapabilityGrant {
    pub fn new(resource: impl Into<String>, ability: Ability) -> Self {
        Self {
            resource: resource.into(),
            ability,
        }
    }

    /// Delegation statement for this grant, `{ability}:{resource}`, with
    /// the wildcard segment preserved verbatim.
    pub fn statement(&self) -> String {
        format!("{}:{}", self.ability.as_str(), self.resource)
    }

    /// Whether this grant covers a concrete resource.
    pub fn covers(&self, resource: &str) -> bool {
        resource_matches(&self.resource, resource)
    }
}

/// Whether `pattern` covers `resource`, treating a `*` identifier segment
/// as a wildcard over the same protocol.
pub fn resource_matches(pattern: &str, resource: &str) -> bool {
    if pattern == resource {
        return true;
    }
    match (parse_resource(pattern), parse_resource(resource)) {
        (Ok((proto_p, "*")), Ok((proto_r, _))) => proto_p == proto_r,
        _ => false,
    }
}

/// Split a resource string into `(protocol, identifier)`.
pub fn parse_resource(resource: &str) -> Result<(&str, &str)> {
    resource
        .split_once("://")
        .ok_or_else(|| Error::Validation(format!("malformed resource string: {resource}")))
}

/// Render a grant set as its stable delegation encoding: one statement per
/// grant, sorted, duplicates removed.
pub fn delegation_statements(grants: &[CapabilityGrant]) -> Vec<String> {
    let mut statements: Vec<String> = grants.iter().map(CapabilityGrant::statement).collect();
    statements.sort();
    statements.dedup();
    statements
}
