//! Observed and desired object state.

use crate::identity::ObjectIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Hex SHA-256 of a desired object's canonical spec.
///
/// Two objects with the same hash need no update between them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecHash(String);

impl SpecHash {
    /// Wraps an existing hash string (e.g. read back from an annotation).
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Computes the hash of a spec.
    ///
    /// `serde_json::Value` objects serialize with sorted keys, so the digest is
    /// independent of the key order in the source document.
    pub fn compute(version: Option<&str>, replicas: Option<u32>, manifest: &serde_json::Value) -> Self {
        let canonical = serde_json::json!({
            "version": version,
            "replicas": replicas,
            "manifest": manifest,
        });
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        Self(format!("{:x}", digest))
    }

    /// Returns the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for SpecHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of an observed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStatus {
    /// Accepted but not yet running
    Pending,
    /// Running / ready
    Running,
    /// Deletion in progress
    Terminating,
    /// Reported by the orchestrator as gone
    Gone,
}

impl ObjectStatus {
    /// Returns true if the object no longer exists for planning purposes.
    pub fn is_gone(&self) -> bool {
        matches!(self, ObjectStatus::Gone)
    }

    /// Returns true if the object is being deleted.
    pub fn is_terminating(&self) -> bool {
        matches!(self, ObjectStatus::Terminating)
    }
}

impl fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectStatus::Pending => write!(f, "pending"),
            ObjectStatus::Running => write!(f, "running"),
            ObjectStatus::Terminating => write!(f, "terminating"),
            ObjectStatus::Gone => write!(f, "gone"),
        }
    }
}

/// One object as seen by the observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedObject {
    /// Object identity
    pub identity: ObjectIdentity,
    /// Spec hash recorded on the object, if it was created by this controller
    pub spec_hash: Option<SpecHash>,
    /// Current status
    pub status: ObjectStatus,
    /// When the object was last observed
    pub observed_at: DateTime<Utc>,
}

impl ObservedObject {
    /// Creates an observed object stamped with the current time.
    pub fn new(identity: ObjectIdentity, spec_hash: Option<SpecHash>, status: ObjectStatus) -> Self {
        Self {
            identity,
            spec_hash,
            status,
            observed_at: Utc::now(),
        }
    }
}

/// One object as the desired-state source wants it.
///
/// Fields are read-only so the spec hash can never drift from the spec it
/// was computed from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DesiredObject {
    identity: ObjectIdentity,
    spec_hash: SpecHash,
    version: Option<String>,
    replicas: Option<u32>,
    manifest: serde_json::Value,
    not_before: Option<DateTime<Utc>>,
}

impl DesiredObject {
    /// Creates a desired object from its manifest.
    pub fn new(identity: ObjectIdentity, manifest: serde_json::Value) -> Self {
        let spec_hash = SpecHash::compute(None, None, &manifest);
        Self {
            identity,
            spec_hash,
            version: None,
            replicas: None,
            manifest,
            not_before: None,
        }
    }

    /// Sets the target version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self.rehash();
        self
    }

    /// Sets the target replica count.
    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = Some(replicas);
        self.rehash();
        self
    }

    /// Defers creation/patching until the given time. Does not affect the hash.
    pub fn with_not_before(mut self, not_before: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self
    }

    fn rehash(&mut self) {
        self.spec_hash =
            SpecHash::compute(self.version.as_deref(), self.replicas, &self.manifest);
    }

    pub fn identity(&self) -> &ObjectIdentity {
        &self.identity
    }

    pub fn spec_hash(&self) -> &SpecHash {
        &self.spec_hash
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn replicas(&self) -> Option<u32> {
        self.replicas
    }

    pub fn manifest(&self) -> &serde_json::Value {
        &self.manifest
    }

    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.not_before
    }

    /// Returns true if the object may be created or patched at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.not_before.map_or(true, |t| t <= now)
    }
}

/// Point-in-time view of the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct ObservedSnapshot {
    objects: BTreeMap<ObjectIdentity, ObservedObject>,
    taken_at: DateTime<Utc>,
}

impl ObservedSnapshot {
    /// Builds a snapshot. A later object with the same identity replaces an
    /// earlier one.
    pub fn new(objects: impl IntoIterator<Item = ObservedObject>, taken_at: DateTime<Utc>) -> Self {
        Self {
            objects: objects
                .into_iter()
                .map(|o| (o.identity.clone(), o))
                .collect(),
            taken_at,
        }
    }

    pub fn get(&self, identity: &ObjectIdentity) -> Option<&ObservedObject> {
        self.objects.get(identity)
    }

    pub fn contains(&self, identity: &ObjectIdentity) -> bool {
        self.objects.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterates objects in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (&ObjectIdentity, &ObservedObject)> {
        self.objects.iter()
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }
}

/// Target state for one cycle.
#[derive(Debug, Clone, Default)]
pub struct DesiredSnapshot {
    objects: BTreeMap<ObjectIdentity, DesiredObject>,
}

impl DesiredSnapshot {
    /// Builds a snapshot, rejecting duplicate identities.
    ///
    /// Returns the first duplicated identity on failure.
    pub fn try_from_objects(
        objects: impl IntoIterator<Item = DesiredObject>,
    ) -> Result<Self, ObjectIdentity> {
        let mut map = BTreeMap::new();
        for object in objects {
            let identity = object.identity().clone();
            if map.insert(identity.clone(), object).is_some() {
                return Err(identity);
            }
        }
        Ok(Self { objects: map })
    }

    pub fn get(&self, identity: &ObjectIdentity) -> Option<&DesiredObject> {
        self.objects.get(identity)
    }

    pub fn contains(&self, identity: &ObjectIdentity) -> bool {
        self.objects.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterates objects in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (&ObjectIdentity, &DesiredObject)> {
        self.objects.iter()
    }
}
