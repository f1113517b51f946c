//! Action outcome and result types.

use crate::identity::ObjectIdentity;
use crate::object::SpecHash;
use crate::plan::ActionKind;
use std::fmt;
use std::time::Duration;

/// Why an action ended in failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Rejected by the orchestrator; retrying cannot help
    Permanent,
    /// Transient errors until the retry cap was reached
    Exhausted,
}

/// Result of executing a single action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Succeeded on the first attempt
    Applied,
    /// Succeeded after transient failures
    Retried { attempts: u32 },
    /// Did not succeed
    Failed {
        kind: FailureKind,
        error: String,
        attempts: u32,
    },
    /// Never started because the cycle was cancelled
    Cancelled,
}

impl ActionOutcome {
    /// Returns true if the mutation took effect.
    pub fn is_success(&self) -> bool {
        matches!(self, ActionOutcome::Applied | ActionOutcome::Retried { .. })
    }

    /// Returns true if the action failed permanently.
    pub fn is_permanent_failure(&self) -> bool {
        matches!(
            self,
            ActionOutcome::Failed {
                kind: FailureKind::Permanent,
                ..
            }
        )
    }

    /// Returns true if the identity should simply be re-evaluated next cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ActionOutcome::Cancelled
                | ActionOutcome::Failed {
                    kind: FailureKind::Exhausted,
                    ..
                }
        )
    }

    /// Number of calls made against the orchestrator.
    pub fn attempts(&self) -> u32 {
        match self {
            ActionOutcome::Applied => 1,
            ActionOutcome::Retried { attempts } | ActionOutcome::Failed { attempts, .. } => {
                *attempts
            }
            ActionOutcome::Cancelled => 0,
        }
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionOutcome::Applied => write!(f, "applied"),
            ActionOutcome::Retried { attempts } => write!(f, "retried ({} attempts)", attempts),
            ActionOutcome::Failed {
                kind: FailureKind::Permanent,
                error,
                ..
            } => write!(f, "failed permanently: {}", error),
            ActionOutcome::Failed {
                kind: FailureKind::Exhausted,
                error,
                attempts,
            } => write!(f, "failed after {} attempts: {}", attempts, error),
            ActionOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of one plan entry, fed back to the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub identity: ObjectIdentity,
    pub kind: ActionKind,
    /// Hash the action targeted (None for deletes)
    pub target_hash: Option<SpecHash>,
    pub outcome: ActionOutcome,
    pub elapsed: Duration,
}

impl ActionResult {
    pub fn new(
        identity: ObjectIdentity,
        kind: ActionKind,
        target_hash: Option<SpecHash>,
        outcome: ActionOutcome,
        elapsed: Duration,
    ) -> Self {
        Self {
            identity,
            kind,
            target_hash,
            outcome,
            elapsed,
        }
    }
}

/// Per-outcome tallies over a set of results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeSummary {
    pub applied: usize,
    pub retried: usize,
    pub failed_permanent: usize,
    pub failed_exhausted: usize,
    pub cancelled: usize,
}

impl OutcomeSummary {
    pub fn from_results(results: &[ActionResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match &result.outcome {
                ActionOutcome::Applied => summary.applied += 1,
                ActionOutcome::Retried { .. } => summary.retried += 1,
                ActionOutcome::Failed {
                    kind: FailureKind::Permanent,
                    ..
                } => summary.failed_permanent += 1,
                ActionOutcome::Failed {
                    kind: FailureKind::Exhausted,
                    ..
                } => summary.failed_exhausted += 1,
                ActionOutcome::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    pub fn succeeded(&self) -> usize {
        self.applied + self.retried
    }

    pub fn failed(&self) -> usize {
        self.failed_permanent + self.failed_exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(kind: FailureKind) -> ActionOutcome {
        ActionOutcome::Failed {
            kind,
            error: "boom".to_string(),
            attempts: 3,
        }
    }

    #[test]
    fn test_outcome_classification() {
        assert!(ActionOutcome::Applied.is_success());
        assert!(ActionOutcome::Retried { attempts: 2 }.is_success());
        assert!(!failed(FailureKind::Permanent).is_success());

        assert!(failed(FailureKind::Permanent).is_permanent_failure());
        assert!(!failed(FailureKind::Exhausted).is_permanent_failure());

        assert!(failed(FailureKind::Exhausted).is_retryable());
        assert!(ActionOutcome::Cancelled.is_retryable());
        assert!(!ActionOutcome::Applied.is_retryable());
    }

    #[test]
    fn test_outcome_attempts() {
        assert_eq!(ActionOutcome::Applied.attempts(), 1);
        assert_eq!(ActionOutcome::Retried { attempts: 4 }.attempts(), 4);
        assert_eq!(failed(FailureKind::Exhausted).attempts(), 3);
        assert_eq!(ActionOutcome::Cancelled.attempts(), 0);
    }

    #[test]
    fn test_outcome_summary() {
        let id = ObjectIdentity::new("ns", "a", "Pod");
        let result = |outcome| {
            ActionResult::new(id.clone(), ActionKind::Create, None, outcome, Duration::ZERO)
        };
        let results = vec![
            result(ActionOutcome::Applied),
            result(ActionOutcome::Retried { attempts: 2 }),
            result(failed(FailureKind::Permanent)),
            result(failed(FailureKind::Exhausted)),
            result(ActionOutcome::Cancelled),
        ];
        let summary = OutcomeSummary::from_results(&results);
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 2);
        assert_eq!(summary.cancelled, 1);
    }
}
