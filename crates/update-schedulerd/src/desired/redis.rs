//! Redis desired-state source.
//!
//! Each desired object is a hash under `<table>|<kind>|<namespace>|<name>`
//! (namespace empty for cluster-scoped kinds) with the fields:
//!
//! | Field | Content |
//! |-------|---------|
//! | manifest | JSON object (required) |
//! | version | free-form string |
//! | replicas | unsigned integer |
//! | not_before | RFC 3339 timestamp |

use super::{build_snapshot, DesiredEntry};
use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info};
use update_scheduler_common::{DesiredSnapshot, DesiredStateError, DesiredStateSource};

/// Desired state read from Redis hashes.
pub struct RedisDesiredSource {
    uri: String,
    table: String,
    connection: ConnectionManager,
}

impl RedisDesiredSource {
    /// Connects to Redis.
    pub async fn connect(
        host: &str,
        port: u16,
        db: i64,
        table: impl Into<String>,
    ) -> Result<Self, DesiredStateError> {
        let uri = format!("redis://{}:{}/{}", host, port, db);

        let client = ::redis::Client::open(uri.clone())
            .map_err(|e| DesiredStateError::Unavailable(format!("{}: {}", uri, e)))?;

        let connection = client.get_connection_manager().await.map_err(|e| {
            DesiredStateError::Unavailable(format!("Failed to connect to {}: {}", uri, e))
        })?;

        let table = table.into();
        info!(uri = %uri, table = %table, "Connected to Redis desired-state source");

        Ok(Self {
            uri,
            table,
            connection,
        })
    }
}

/// Builds an entry from a Redis key and its hash fields.
pub(crate) fn parse_entry(
    table: &str,
    key: &str,
    mut fields: HashMap<String, String>,
) -> Result<DesiredEntry, DesiredStateError> {
    let invalid = |msg: String| DesiredStateError::Invalid(format!("{}: {}", key, msg));

    let mut parts = key.splitn(4, '|');
    let (kind, namespace, name) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(t), Some(kind), Some(namespace), Some(name)) if t == table => (kind, namespace, name),
        _ => return Err(invalid(format!("expected {}|kind|namespace|name", table))),
    };

    let manifest = match fields.remove("manifest") {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| invalid(format!("manifest: {}", e)))?,
        None => return Err(invalid("missing manifest field".to_string())),
    };

    let replicas = fields
        .remove("replicas")
        .map(|raw| raw.parse::<u32>())
        .transpose()
        .map_err(|e| invalid(format!("replicas: {}", e)))?;

    let not_before = fields
        .remove("not_before")
        .map(|raw| DateTime::parse_from_rfc3339(&raw).map(|t| t.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| invalid(format!("not_before: {}", e)))?;

    Ok(DesiredEntry {
        kind: kind.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        version: fields.remove("version"),
        replicas,
        not_before,
        manifest,
    })
}

#[async_trait]
impl DesiredStateSource for RedisDesiredSource {
    fn describe(&self) -> String {
        format!("{} table {}", self.uri, self.table)
    }

    async fn resolve(&self) -> Result<DesiredSnapshot, DesiredStateError> {
        let mut connection = self.connection.clone();
        let pattern = format!("{}|*", self.table);

        let keys: Vec<String> = connection
            .keys(&pattern)
            .await
            .map_err(|e| DesiredStateError::Unavailable(format!("KEYS failed: {}", e)))?;

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let fields: HashMap<String, String> = connection
                .hgetall(&key)
                .await
                .map_err(|e| DesiredStateError::Unavailable(format!("HGETALL failed: {}", e)))?;
            // Deleted between KEYS and HGETALL
            if fields.is_empty() {
                continue;
            }
            entries.push(parse_entry(&self.table, &key, fields)?);
        }

        debug!(table = %self.table, objects = entries.len(), "Desired state resolved");
        build_snapshot(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_full_entry() {
        let entry = parse_entry(
            "DESIRED_OBJECT",
            "DESIRED_OBJECT|Job|batch|table-refresh",
            fields(&[
                ("manifest", r#"{"image":"refresh:2"}"#),
                ("version", "v2"),
                ("replicas", "3"),
                ("not_before", "2030-01-01T00:00:00+02:00"),
            ]),
        )
        .unwrap();

        assert_eq!(entry.kind, "Job");
        assert_eq!(entry.namespace, "batch");
        assert_eq!(entry.name, "table-refresh");
        assert_eq!(entry.version.as_deref(), Some("v2"));
        assert_eq!(entry.replicas, Some(3));
        assert_eq!(
            entry.not_before.map(|t| t.to_rfc3339()),
            Some("2029-12-31T22:00:00+00:00".to_string())
        );
        assert_eq!(entry.manifest, json!({"image": "refresh:2"}));
    }

    #[test]
    fn test_parse_cluster_scoped_key() {
        let entry = parse_entry(
            "DESIRED_OBJECT",
            "DESIRED_OBJECT|Node||worker-1",
            fields(&[("manifest", "{}")]),
        )
        .unwrap();
        assert!(entry.identity().is_cluster_scoped());
        assert_eq!(entry.name, "worker-1");
    }

    #[test]
    fn test_parse_rejects_bad_entries() {
        let bad = [
            ("DESIRED_OBJECT|Job|batch", fields(&[("manifest", "{}")])),
            ("OTHER|Job|batch|a", fields(&[("manifest", "{}")])),
            ("DESIRED_OBJECT|Job|batch|a", fields(&[("version", "v1")])),
            ("DESIRED_OBJECT|Job|batch|a", fields(&[("manifest", "{")])),
            (
                "DESIRED_OBJECT|Job|batch|a",
                fields(&[("manifest", "{}"), ("replicas", "-1")]),
            ),
            (
                "DESIRED_OBJECT|Job|batch|a",
                fields(&[("manifest", "{}"), ("not_before", "tomorrow")]),
            ),
        ];
        for (key, f) in bad {
            assert!(
                matches!(parse_entry("DESIRED_OBJECT", key, f), Err(DesiredStateError::Invalid(_))),
                "{} should be rejected",
                key
            );
        }
    }
}
