//! Stable object identity shared by observed and desired state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when an identity string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid object identity '{0}': expected kind/namespace/name")]
pub struct IdentityParseError(pub String);

/// Key identifying one orchestrator object across reconciliation cycles.
///
/// Ordering is lexicographic over namespace, then name, then kind. Plans and
/// snapshots iterate identities in this order, which is what makes plan
/// ordering deterministic. Cluster-scoped objects (nodes) use an empty
/// namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectIdentity {
    /// Namespace (empty for cluster-scoped kinds)
    #[serde(default)]
    pub namespace: String,
    /// Object name
    pub name: String,
    /// Object kind (e.g. "Pod", "Job", "Node")
    pub kind: String,
}

impl ObjectIdentity {
    /// Creates a namespaced identity.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind: kind.into(),
        }
    }

    /// Creates a cluster-scoped identity.
    pub fn cluster_scoped(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::new("", name, kind)
    }

    /// Returns true if the identity has no namespace.
    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_empty()
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

impl FromStr for ObjectIdentity {
    type Err = IdentityParseError;

    /// Parses the `kind/namespace/name` display form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some(namespace), Some(name)) if !kind.is_empty() && !name.is_empty() => {
                Ok(Self::new(namespace, name, kind))
            }
            _ => Err(IdentityParseError(s.to_string())),
        }
    }
}
