//! Error types for the reconciliation pipeline.
//!
//! Each stage has its own enum. Orchestrator errors carry the
//! transient/permanent split the executor's retry decision is based on.

use crate::object::ObservedSnapshot;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for orchestrator calls.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors returned by an orchestrator API call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    /// Connection refused, DNS failure, reset, ...
    #[error("orchestrator unreachable: {0}")]
    Unavailable(String),

    /// The call did not complete in time.
    #[error("orchestrator call timed out: {0}")]
    Timeout(String),

    /// Server-side failure (5xx).
    #[error("orchestrator server error ({status}): {message}")]
    Server {
        /// HTTP-like status code
        status: u16,
        /// Error body
        message: String,
    },

    /// Optimistic concurrency conflict.
    #[error("conflict on {0}")]
    Conflict(String),

    /// Throttled by the API server.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Request rejected as invalid.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Not authorized to perform the call.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Create target already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Object does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl OrchestratorError {
    /// Returns true if the call may succeed when repeated.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Unavailable(_)
                | OrchestratorError::Timeout(_)
                | OrchestratorError::Server { .. }
                | OrchestratorError::Conflict(_)
                | OrchestratorError::RateLimited(_)
        )
    }

    /// Returns true if the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrchestratorError::NotFound(_))
    }
}

/// Errors returned by an observer.
#[derive(Debug, Error)]
pub enum ObserverError {
    /// A transient failure occurred; the last good snapshot is attached.
    #[error("stale snapshot: {reason}")]
    StaleSnapshot {
        /// Previous snapshot, served from cache
        cached: ObservedSnapshot,
        /// Failure that prevented a fresh read
        reason: OrchestratorError,
    },

    /// The listing did not finish within the configured timeout.
    #[error("observer timed out after {after:?}")]
    Timeout {
        /// Configured timeout
        after: Duration,
    },

    /// Transient failure with nothing cached yet.
    #[error("observer unavailable: {0}")]
    Unavailable(#[source] OrchestratorError),

    /// Non-transient API failure.
    #[error("observer API error: {0}")]
    Api(#[source] OrchestratorError),
}

/// Errors returned by a desired-state source.
#[derive(Debug, Error)]
pub enum DesiredStateError {
    /// The source could not be read.
    #[error("desired state unavailable: {0}")]
    Unavailable(String),

    /// The source was read but its content is not a valid desired state.
    #[error("invalid desired state: {0}")]
    Invalid(String),
}
