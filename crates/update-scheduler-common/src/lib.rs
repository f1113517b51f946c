//! Common reconciliation abstractions for update-scheduler.
//!
//! This crate provides the types and traits shared by the scheduler daemon
//! and its test harness:
//!
//! - [`ObjectIdentity`]: stable (namespace, name, kind) key
//! - [`ObservedSnapshot`] / [`DesiredSnapshot`]: the two sides of a diff
//! - [`ReconciliationPlan`] / [`Action`]: per-cycle immutable plan
//! - [`ActionResult`] / [`ActionOutcome`]: executor feedback
//! - [`RetryPolicy`] / [`FailureLedger`]: transient and permanent failure handling
//! - [`InFlightRegistry`]: at most one outstanding action per identity
//! - [`OrchestratorClient`], [`Observer`], [`DesiredStateSource`]: the seams
//!
//! # Architecture
//!
//! One reconciliation cycle flows through the types in this order:
//!
//! 1. An [`Observer`] and a [`DesiredStateSource`] produce snapshots
//! 2. The reconciler diffs them into a [`ReconciliationPlan`]
//! 3. The executor applies the plan through an [`OrchestratorClient`]
//! 4. [`ActionResult`]s are fed back before the next cycle

mod error;
mod identity;
mod in_flight;
mod object;
mod outcome;
mod plan;
mod retry;
mod source;

pub use error::{DesiredStateError, ObserverError, OrchestratorError, OrchestratorResult};
pub use identity::{IdentityParseError, ObjectIdentity};
pub use in_flight::{InFlightRegistry, Reservation};
pub use object::{
    DesiredObject, DesiredSnapshot, ObjectStatus, ObservedObject, ObservedSnapshot, SpecHash,
};
pub use outcome::{ActionOutcome, ActionResult, FailureKind, OutcomeSummary};
pub use plan::{Action, ActionKind, ReconciliationPlan};
pub use retry::{FailureLedger, ParkedFailure, RetryPolicy};
pub use source::{DesiredStateSource, Observer, OrchestratorClient};

#[cfg(any(test, feature = "mock"))]
pub use source::{MockDesiredStateSource, MockObserver, MockOrchestratorClient};
