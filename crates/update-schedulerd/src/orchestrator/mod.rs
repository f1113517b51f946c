//! Orchestrator API clients.

mod http;
mod memory;

pub use http::{KubeRestClient, MANAGED_BY_LABEL, SPEC_HASH_ANNOTATION, VERSION_ANNOTATION};
pub use memory::{MemoryOrchestrator, RecordedCall};

use crate::config::{Backend, SchedulerConfig};
use crate::error::Result;
use std::sync::Arc;
use tracing::info;
use update_scheduler_common::OrchestratorClient;

/// Builds the configured orchestrator client.
pub fn build_client(config: &SchedulerConfig) -> Result<Arc<dyn OrchestratorClient>> {
    let client: Arc<dyn OrchestratorClient> = match config.orchestrator.backend {
        Backend::Kubernetes => Arc::new(KubeRestClient::from_config(
            &config.orchestrator,
            config.request_timeout(),
        )?),
        Backend::Memory => Arc::new(MemoryOrchestrator::new()),
    };
    info!(backend = client.backend(), "Orchestrator client ready");
    Ok(client)
}
