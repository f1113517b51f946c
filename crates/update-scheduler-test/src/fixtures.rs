//! Test fixtures for desired and observed objects
//!
//! Provides reusable objects and on-disk files for scheduler testing

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use update_scheduler_common::{DesiredObject, ObjectIdentity, ObjectStatus, ObservedObject};
use update_schedulerd::desired::DesiredEntry;

/// Pod running `image:<version>`
pub fn pod(namespace: &str, name: &str, version: &str) -> DesiredObject {
    DesiredObject::new(
        ObjectIdentity::new(namespace, name, "Pod"),
        json!({"spec": {"containers": [{"name": name, "image": format!("{}:{}", name, version)}]}}),
    )
    .with_version(version)
}

/// Job with a replica count (parallelism)
pub fn job(namespace: &str, name: &str, version: &str, replicas: u32) -> DesiredObject {
    DesiredObject::new(
        ObjectIdentity::new(namespace, name, "Job"),
        json!({"spec": {"template": {"spec": {"restartPolicy": "Never"}}}}),
    )
    .with_version(version)
    .with_replicas(replicas)
}

/// Cluster-scoped node object
pub fn node(name: &str, version: &str) -> DesiredObject {
    DesiredObject::new(
        ObjectIdentity::cluster_scoped(name, "Node"),
        json!({"metadata": {"labels": {"pool": "default"}}}),
    )
    .with_version(version)
}

/// Same object, scheduled for later
pub fn scheduled(object: DesiredObject, not_before: DateTime<Utc>) -> DesiredObject {
    object.with_not_before(not_before)
}

/// Observed view of an object already at its desired state
pub fn observed_at(object: &DesiredObject, status: ObjectStatus) -> ObservedObject {
    ObservedObject::new(
        object.identity().clone(),
        Some(object.spec_hash().clone()),
        status,
    )
}

/// Converts an object into the declarative entry format
pub fn entry(object: &DesiredObject) -> DesiredEntry {
    let identity = object.identity();
    DesiredEntry {
        kind: identity.kind.clone(),
        namespace: identity.namespace.clone(),
        name: identity.name.clone(),
        version: object.version().map(str::to_string),
        replicas: object.replicas(),
        not_before: object.not_before(),
        manifest: object.manifest().clone(),
    }
}

/// Desired-state YAML file in a temporary directory
pub struct DesiredFile {
    _dir: TempDir,
    path: PathBuf,
}

impl DesiredFile {
    /// Create an empty desired file location (the file itself is not written)
    pub fn new() -> io::Result<Self> {
        let dir = TempDir::new()?;
        let path = dir.path().join("desired.yaml");
        Ok(Self { _dir: dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the objects as a desired-state document
    pub fn write(&self, objects: &[DesiredObject]) -> io::Result<()> {
        let mut document = BTreeMap::new();
        document.insert("objects", objects.iter().map(entry).collect::<Vec<_>>());
        let document = serde_yaml::to_string(&document)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.write_raw(&document)
    }

    /// Write arbitrary content
    pub fn write_raw(&self, content: &str) -> io::Result<()> {
        std::fs::write(&self.path, content)
    }

    /// Scheduler config using this file and the memory backend
    pub fn config_toml(&self) -> String {
        format!(
            r#"
[scheduler]
interval_secs = 1
debounce_ms = 50

[executor]
worker_pool_size = 2
max_actions_per_cycle = 100

[retry]
max_attempts = 2
initial_backoff_ms = 1
max_backoff_ms = 5
jitter = 0.0

[desired]
source = "file"
path = "{}"

[orchestrator]
backend = "memory"
"#,
            self.path.display()
        )
    }
}
