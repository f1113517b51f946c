//! Desired-state sources.
//!
//! All sources share the [`DesiredEntry`] record format and the duplicate
//! check in [`build_snapshot`]; they differ only in where entries come from.

mod file;
mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use file::FileDesiredSource;
pub use memory::MemoryDesiredSource;
#[cfg(feature = "redis")]
pub use self::redis::RedisDesiredSource;

use crate::config::DesiredSourceConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use update_scheduler_common::{
    DesiredObject, DesiredSnapshot, DesiredStateError, DesiredStateSource, ObjectIdentity,
};

/// Builds the configured desired-state source.
///
/// Redis sources connect here, so an unreachable server fails startup.
pub async fn build_source(
    config: &DesiredSourceConfig,
) -> crate::error::Result<Arc<dyn DesiredStateSource>> {
    match config {
        DesiredSourceConfig::File { path } => Ok(Arc::new(FileDesiredSource::new(path.clone()))),
        #[cfg(feature = "redis")]
        DesiredSourceConfig::Redis {
            host,
            port,
            db,
            table,
        } => Ok(Arc::new(
            RedisDesiredSource::connect(host, *port, *db, table.clone()).await?,
        )),
        #[cfg(not(feature = "redis"))]
        DesiredSourceConfig::Redis { .. } => Err(crate::error::ConfigError::invalid(
            "desired.source",
            "redis support not compiled in",
        )
        .into()),
    }
}

/// One desired object as written in a declarative source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredEntry {
    pub kind: String,
    /// Omitted for cluster-scoped kinds
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub replicas: Option<u32>,
    /// Earliest time the object may be created or updated
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
    /// Object body sent to the orchestrator
    #[serde(default = "empty_manifest")]
    pub manifest: serde_json::Value,
}

fn empty_manifest() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl DesiredEntry {
    pub fn identity(&self) -> ObjectIdentity {
        ObjectIdentity::new(&self.namespace, &self.name, &self.kind)
    }

    /// Validates the entry and converts it.
    pub fn into_desired(self) -> Result<DesiredObject, DesiredStateError> {
        if self.kind.is_empty() || self.name.is_empty() {
            return Err(DesiredStateError::Invalid(format!(
                "entry '{}' needs a kind and a name",
                self.identity()
            )));
        }
        if !self.manifest.is_object() {
            return Err(DesiredStateError::Invalid(format!(
                "manifest of {} must be a mapping",
                self.identity()
            )));
        }

        let mut object = DesiredObject::new(self.identity(), self.manifest);
        if let Some(version) = self.version {
            object = object.with_version(version);
        }
        if let Some(replicas) = self.replicas {
            object = object.with_replicas(replicas);
        }
        if let Some(not_before) = self.not_before {
            object = object.with_not_before(not_before);
        }
        Ok(object)
    }
}

/// Converts entries into a snapshot, rejecting duplicate identities.
pub fn build_snapshot(
    entries: impl IntoIterator<Item = DesiredEntry>,
) -> Result<DesiredSnapshot, DesiredStateError> {
    let objects = entries
        .into_iter()
        .map(DesiredEntry::into_desired)
        .collect::<Result<Vec<_>, _>>()?;

    DesiredSnapshot::try_from_objects(objects)
        .map_err(|id| DesiredStateError::Invalid(format!("duplicate desired object {}", id)))
}
