//! YAML file desired-state source.
//!
//! ```yaml
//! objects:
//!   - kind: Job
//!     namespace: batch
//!     name: table-refresh
//!     version: v2
//!     not_before: 2026-01-01T00:00:00Z
//!     manifest:
//!       image: refresh:2
//! ```
//!
//! The file is re-read on every cycle. An empty file is reported unavailable
//! (it is usually a write in progress) rather than read as "nothing desired";
//! write `objects: []` for that.

use super::{build_snapshot, DesiredEntry};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;
use update_scheduler_common::{DesiredSnapshot, DesiredStateError, DesiredStateSource};

#[derive(Debug, Deserialize)]
struct DesiredDocument {
    objects: Vec<DesiredEntry>,
}

/// Desired state read from a YAML document.
#[derive(Debug, Clone)]
pub struct FileDesiredSource {
    path: PathBuf,
}

impl FileDesiredSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses a document without touching the filesystem.
    pub fn parse(content: &str) -> Result<DesiredSnapshot, DesiredStateError> {
        if content.trim().is_empty() {
            return Err(DesiredStateError::Unavailable(
                "document is empty (use `objects: []` to desire nothing)".to_string(),
            ));
        }
        let document: DesiredDocument = serde_yaml::from_str(content)
            .map_err(|e| DesiredStateError::Invalid(e.to_string()))?;
        build_snapshot(document.objects)
    }
}

#[async_trait]
impl DesiredStateSource for FileDesiredSource {
    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn resolve(&self) -> Result<DesiredSnapshot, DesiredStateError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            DesiredStateError::Unavailable(format!("{}: {}", self.path.display(), e))
        })?;

        let snapshot = Self::parse(&content).map_err(|e| match e {
            DesiredStateError::Invalid(msg) => {
                DesiredStateError::Invalid(format!("{}: {}", self.path.display(), msg))
            }
            DesiredStateError::Unavailable(msg) => {
                DesiredStateError::Unavailable(format!("{}: {}", self.path.display(), msg))
            }
        })?;

        debug!(path = %self.path.display(), objects = snapshot.len(), "Desired state resolved");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use update_scheduler_common::ObjectIdentity;

    const DOCUMENT: &str = r#"
objects:
  - kind: Job
    namespace: batch
    name: table-refresh
    version: v2
    not_before: 2030-01-01T00:00:00Z
    manifest:
      image: refresh:2
  - kind: Node
    name: worker-1
    manifest:
      labels:
        pool: blue
"#;

    #[test]
    fn test_parse_document() {
        let snapshot = FileDesiredSource::parse(DOCUMENT).unwrap();
        assert_eq!(snapshot.len(), 2);

        let job = snapshot
            .get(&ObjectIdentity::new("batch", "table-refresh", "Job"))
            .unwrap();
        assert_eq!(job.version(), Some("v2"));
        assert!(job.not_before().is_some());

        let node = snapshot
            .get(&ObjectIdentity::cluster_scoped("worker-1", "Node"))
            .unwrap();
        assert!(node.identity().is_cluster_scoped());
    }

    #[test]
    fn test_parse_rejects_empty_and_malformed() {
        assert!(matches!(
            FileDesiredSource::parse("   \n"),
            Err(DesiredStateError::Unavailable(_))
        ));
        assert!(matches!(
            FileDesiredSource::parse("objects: 12"),
            Err(DesiredStateError::Invalid(_))
        ));
        assert!(FileDesiredSource::parse("objects: []").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DOCUMENT.as_bytes()).unwrap();

        let source = FileDesiredSource::new(file.path());
        assert!(source.describe().starts_with("file:"));
        assert_eq!(source.resolve().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let source = FileDesiredSource::new("/nonexistent/desired.yaml");
        assert!(matches!(
            source.resolve().await,
            Err(DesiredStateError::Unavailable(_))
        ));
    }
}
