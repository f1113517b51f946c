//! Capability traits at the seams of the reconciliation loop.
//!
//! The scheduler only talks to the outside world through these traits:
//! the orchestrator API, the observer built on top of it, and the
//! declarative source of desired state. Polling and watch-based observers,
//! file and Redis desired sources all satisfy the same contracts.

use crate::error::{DesiredStateError, ObserverError, OrchestratorResult};
use crate::identity::ObjectIdentity;
use crate::object::{DesiredObject, DesiredSnapshot, ObservedObject, ObservedSnapshot};
use async_trait::async_trait;

/// Read and write access to the orchestrator API.
///
/// Implementations must be `Send + Sync`; the executor calls them from
/// several worker tasks at once.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    /// Backend name for logs.
    fn backend(&self) -> &'static str;

    /// Checks that the API is reachable at all.
    async fn probe(&self) -> OrchestratorResult<()>;

    /// Lists every managed object.
    async fn list_objects(&self) -> OrchestratorResult<Vec<ObservedObject>>;

    /// Creates an object from its desired state.
    async fn create(&self, object: &DesiredObject) -> OrchestratorResult<()>;

    /// Updates an existing object to its desired state.
    async fn patch(&self, object: &DesiredObject) -> OrchestratorResult<()>;

    /// Deletes an object.
    async fn delete(&self, identity: &ObjectIdentity) -> OrchestratorResult<()>;
}

/// Produces point-in-time views of the orchestrator.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait Observer: Send + Sync {
    /// Returns a consistent snapshot of all managed objects.
    ///
    /// On a transient failure the previous snapshot is returned inside
    /// [`ObserverError::StaleSnapshot`]. Never blocks longer than the
    /// observer's configured timeout.
    async fn snapshot(&self) -> Result<ObservedSnapshot, ObserverError>;
}

/// Resolves the intended target state for one cycle.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait DesiredStateSource: Send + Sync {
    /// Short description of the source location for logs.
    fn describe(&self) -> String;

    /// Reads the full desired state.
    async fn resolve(&self) -> Result<DesiredSnapshot, DesiredStateError>;
}
