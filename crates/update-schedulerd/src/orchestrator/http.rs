//! Kubernetes-compatible REST client.
//!
//! Talks plain JSON over HTTPS with reqwest. Only objects carrying the
//! managed-by label are listed; the spec hash an object was written with is
//! stored in an annotation and read back on the next listing.

use crate::config::{KindConfig, OrchestratorConfig};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use update_scheduler_common::{
    DesiredObject, ObjectIdentity, ObjectStatus, ObservedObject, OrchestratorClient,
    OrchestratorError, OrchestratorResult, SpecHash,
};

/// Label selecting objects owned by this daemon
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Annotation holding the spec hash an object was written with
pub const SPEC_HASH_ANNOTATION: &str = "update-scheduler.io/spec-hash";
/// Annotation holding the desired version, when set
pub const VERSION_ANNOTATION: &str = "update-scheduler.io/version";

const MERGE_PATCH: &str = "application/merge-patch+json";

/// REST client for a Kubernetes-compatible API server.
#[derive(Clone)]
pub struct KubeRestClient {
    base_url: String,
    client: reqwest::Client,
    token: Option<String>,
    managed_by: String,
    kinds: Vec<KindConfig>,
    namespaces: Vec<String>,
}

impl KubeRestClient {
    /// Builds a client without credentials.
    pub fn new(
        base_url: impl Into<String>,
        managed_by: impl Into<String>,
        kinds: Vec<KindConfig>,
        namespaces: Vec<String>,
        timeout: Duration,
    ) -> OrchestratorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OrchestratorError::Invalid(format!("HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            token: None,
            managed_by: managed_by.into(),
            kinds,
            namespaces,
        })
    }

    /// Builds a client from configuration, falling back to the in-cluster
    /// service account for the server address, token and CA.
    pub fn from_config(config: &OrchestratorConfig, timeout: Duration) -> OrchestratorResult<Self> {
        let base_url = match &config.api_server {
            Some(url) => url.clone(),
            None => in_cluster_url().ok_or_else(|| {
                OrchestratorError::Invalid(
                    "orchestrator.api_server unset and KUBERNETES_SERVICE_HOST not present"
                        .to_string(),
                )
            })?,
        };

        let mut builder = reqwest::Client::builder().timeout(timeout);
        match std::fs::read(&config.ca_cert_path) {
            Ok(pem) => {
                let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                    OrchestratorError::Invalid(format!(
                        "CA certificate {}: {}",
                        config.ca_cert_path.display(),
                        e
                    ))
                })?;
                builder = builder.add_root_certificate(cert);
            }
            Err(e) => debug!(path = %config.ca_cert_path.display(), error = %e, "No CA certificate loaded"),
        }
        let client = builder
            .build()
            .map_err(|e| OrchestratorError::Invalid(format!("HTTP client: {}", e)))?;

        let token = match std::fs::read_to_string(&config.token_path) {
            Ok(token) => Some(token.trim().to_string()),
            Err(e) => {
                debug!(path = %config.token_path.display(), error = %e, "No bearer token loaded");
                None
            }
        };

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            token,
            managed_by: config.managed_by.clone(),
            kinds: config.kinds.clone(),
            namespaces: config.namespaces.clone(),
        })
    }

    fn kind(&self, kind: &str) -> OrchestratorResult<&KindConfig> {
        self.kinds
            .iter()
            .find(|k| k.kind == kind)
            .ok_or_else(|| OrchestratorError::Invalid(format!("kind {} is not configured", kind)))
    }

    fn collection_url(&self, kind: &KindConfig, namespace: Option<&str>) -> String {
        let prefix = if kind.api_version.contains('/') {
            format!("{}/apis/{}", self.base_url, kind.api_version)
        } else {
            format!("{}/api/{}", self.base_url, kind.api_version)
        };
        match namespace {
            Some(ns) if kind.namespaced => format!("{}/namespaces/{}/{}", prefix, ns, kind.plural),
            _ => format!("{}/{}", prefix, kind.plural),
        }
    }

    /// Collection URL for an identity, checking its scope against the kind.
    fn scoped_collection_url(
        &self,
        kind: &KindConfig,
        identity: &ObjectIdentity,
    ) -> OrchestratorResult<String> {
        match (kind.namespaced, identity.is_cluster_scoped()) {
            (true, true) => Err(OrchestratorError::Invalid(format!(
                "{} is namespaced but {} has no namespace",
                kind.kind, identity
            ))),
            (false, false) => Err(OrchestratorError::Invalid(format!(
                "{} is cluster-scoped but {} has a namespace",
                kind.kind, identity
            ))),
            _ => Ok(self.collection_url(kind, Some(&identity.namespace))),
        }
    }

    fn object_url(&self, kind: &KindConfig, identity: &ObjectIdentity) -> OrchestratorResult<String> {
        Ok(format!(
            "{}/{}",
            self.scoped_collection_url(kind, identity)?,
            identity.name
        ))
    }

    /// Request body for create and patch.
    fn body(&self, kind: &KindConfig, object: &DesiredObject) -> Value {
        let identity = object.identity();
        let mut body = object.manifest().clone();
        if !body.is_object() {
            body = json!({});
        }

        if !body["metadata"].is_object() {
            body["metadata"] = json!({});
        }
        for path in ["labels", "annotations"] {
            if !body["metadata"][path].is_object() {
                body["metadata"][path] = json!({});
            }
        }

        body["apiVersion"] = json!(kind.api_version);
        body["kind"] = json!(kind.kind);
        body["metadata"]["name"] = json!(identity.name);
        if kind.namespaced {
            body["metadata"]["namespace"] = json!(identity.namespace);
        }
        body["metadata"]["labels"][MANAGED_BY_LABEL] = json!(self.managed_by);
        body["metadata"]["annotations"][SPEC_HASH_ANNOTATION] = json!(object.spec_hash().as_str());
        if let Some(version) = object.version() {
            body["metadata"]["annotations"][VERSION_ANNOTATION] = json!(version);
        }
        if let Some(replicas) = object.replicas() {
            if !body["spec"].is_object() {
                body["spec"] = json!({});
            }
            body["spec"]["replicas"] = json!(replicas);
        }
        body
    }

    async fn send(&self, request: RequestBuilder) -> OrchestratorResult<Response> {
        let request = match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                OrchestratorError::Timeout(e.to_string())
            } else {
                OrchestratorError::Unavailable(e.to_string())
            }
        })?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.bytes().await.unwrap_or_default();
        let parsed = serde_json::from_slice::<Value>(&body).ok();
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| String::from_utf8_lossy(&body).to_string());
        let reason = parsed
            .as_ref()
            .and_then(|v| v.get("reason"))
            .and_then(|v| v.as_str());

        Err(map_status(status, reason, message))
    }

    async fn list_collection(&self, kind: &KindConfig, url: String) -> OrchestratorResult<Vec<ObservedObject>> {
        let selector = format!("{}={}", MANAGED_BY_LABEL, self.managed_by);
        let response = self
            .send(self.client.get(&url).query(&[("labelSelector", selector)]))
            .await?;
        let list: Value = response
            .json()
            .await
            .map_err(|e| OrchestratorError::Unavailable(format!("invalid list response: {}", e)))?;

        let items = list.get("items").and_then(|v| v.as_array());
        Ok(items
            .into_iter()
            .flatten()
            .filter_map(|item| {
                let parsed = parse_item(&kind.kind, item);
                if parsed.is_none() {
                    warn!(kind = %kind.kind, "Skipping list item without metadata.name");
                }
                parsed
            })
            .collect())
    }
}

fn in_cluster_url() -> Option<String> {
    let host = std::env::var("KUBERNETES_SERVICE_HOST").ok()?;
    let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
    if host.contains(':') {
        Some(format!("https://[{}]:{}", host, port))
    } else {
        Some(format!("https://{}:{}", host, port))
    }
}

/// Maps an error status to the transient/permanent taxonomy.
pub(crate) fn map_status(status: StatusCode, reason: Option<&str>, message: String) -> OrchestratorError {
    match status {
        StatusCode::CONFLICT if reason == Some("AlreadyExists") => {
            OrchestratorError::AlreadyExists(message)
        }
        StatusCode::CONFLICT => OrchestratorError::Conflict(message),
        StatusCode::NOT_FOUND => OrchestratorError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => OrchestratorError::Forbidden(message),
        StatusCode::TOO_MANY_REQUESTS => OrchestratorError::RateLimited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            OrchestratorError::Timeout(message)
        }
        s if s.is_server_error() => OrchestratorError::Server {
            status: s.as_u16(),
            message,
        },
        _ => OrchestratorError::Invalid(format!("{}: {}", status, message)),
    }
}

/// Reads one list item.
pub(crate) fn parse_item(kind: &str, item: &Value) -> Option<ObservedObject> {
    let metadata = item.get("metadata")?;
    let name = metadata.get("name")?.as_str()?;
    let namespace = metadata
        .get("namespace")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let spec_hash = metadata
        .get("annotations")
        .and_then(|a| a.get(SPEC_HASH_ANNOTATION))
        .and_then(|v| v.as_str())
        .map(SpecHash::new);

    let status = if metadata.get("deletionTimestamp").is_some_and(|v| !v.is_null()) {
        ObjectStatus::Terminating
    } else {
        match item.pointer("/status/phase").and_then(|v| v.as_str()) {
            Some("Pending") => ObjectStatus::Pending,
            _ => ObjectStatus::Running,
        }
    };

    Some(ObservedObject::new(
        ObjectIdentity::new(namespace, name, kind),
        spec_hash,
        status,
    ))
}

#[async_trait]
impl OrchestratorClient for KubeRestClient {
    fn backend(&self) -> &'static str {
        "kubernetes"
    }

    async fn probe(&self) -> OrchestratorResult<()> {
        self.send(self.client.get(format!("{}/version", self.base_url)))
            .await
            .map(|_| ())
    }

    #[instrument(skip(self))]
    async fn list_objects(&self) -> OrchestratorResult<Vec<ObservedObject>> {
        let mut objects = Vec::new();
        for kind in &self.kinds {
            if kind.namespaced && !self.namespaces.is_empty() {
                for ns in &self.namespaces {
                    let url = self.collection_url(kind, Some(ns));
                    objects.extend(self.list_collection(kind, url).await?);
                }
            } else {
                let url = self.collection_url(kind, None);
                objects.extend(self.list_collection(kind, url).await?);
            }
        }
        debug!(objects = objects.len(), "Listed managed objects");
        Ok(objects)
    }

    async fn create(&self, object: &DesiredObject) -> OrchestratorResult<()> {
        let kind = self.kind(&object.identity().kind)?;
        let url = self.scoped_collection_url(kind, object.identity())?;
        self.send(self.client.post(url).json(&self.body(kind, object)))
            .await
            .map(|_| ())
    }

    async fn patch(&self, object: &DesiredObject) -> OrchestratorResult<()> {
        let kind = self.kind(&object.identity().kind)?;
        let url = self.object_url(kind, object.identity())?;
        let body = serde_json::to_vec(&self.body(kind, object))
            .map_err(|e| OrchestratorError::Invalid(e.to_string()))?;
        self.send(
            self.client
                .patch(url)
                .header(CONTENT_TYPE, MERGE_PATCH)
                .body(body),
        )
        .await
        .map(|_| ())
    }

    async fn delete(&self, identity: &ObjectIdentity) -> OrchestratorResult<()> {
        let kind = self.kind(&identity.kind)?;
        let url = self.object_url(kind, identity)?;
        self.send(self.client.delete(url)).await.map(|_| ())
    }
}
