//! Audit trail and logging setup.
//!
//! Every mutating action the executor issues and every lifecycle event of the
//! daemon produces an [`AuditRecord`]. Records are emitted through
//! [`audit_log!`](crate::audit_log) on the `audit` tracing target as a JSON
//! payload, so they can be filtered and shipped separately from the
//! operational log.
//!
//! Severity follows the outcome:
//!
//! | Outcome | Level |
//! |---------|-------|
//! | Success | info |
//! | InProgress | debug |
//! | Failure / Denied | warn |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use update_scheduler_common::{ActionKind, ActionOutcome, ActionResult};

/// Audit event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// Object created in the orchestrator
    ResourceCreate,
    /// Object patched in the orchestrator
    ResourceModify,
    /// Object deleted from the orchestrator
    ResourceDelete,
    /// Daemon startup and shutdown
    SystemLifecycle,
    /// Reconciliation cycle boundaries
    ReconcileCycle,
    /// Error and failure events
    ErrorCondition,
    /// Operator-initiated actions (manual trigger, one-shot run)
    AdminAction,
}

impl AuditCategory {
    /// Category for a mutating action.
    pub fn for_action(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Create => AuditCategory::ResourceCreate,
            ActionKind::Patch => AuditCategory::ResourceModify,
            ActionKind::Delete => AuditCategory::ResourceDelete,
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditCategory::ResourceCreate => write!(f, "RESOURCE_CREATE"),
            AuditCategory::ResourceModify => write!(f, "RESOURCE_MODIFY"),
            AuditCategory::ResourceDelete => write!(f, "RESOURCE_DELETE"),
            AuditCategory::SystemLifecycle => write!(f, "SYSTEM_LIFECYCLE"),
            AuditCategory::ReconcileCycle => write!(f, "RECONCILE_CYCLE"),
            AuditCategory::ErrorCondition => write!(f, "ERROR_CONDITION"),
            AuditCategory::AdminAction => write!(f, "ADMIN_ACTION"),
        }
    }
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    /// Action completed successfully
    Success,
    /// Action failed
    Failure,
    /// Action is in progress
    InProgress,
    /// Action was not carried out (cancelled, skipped)
    Denied,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Failure => write!(f, "failure"),
            AuditOutcome::InProgress => write!(f, "in_progress"),
            AuditOutcome::Denied => write!(f, "denied"),
        }
    }
}

/// Structured audit record.
///
/// Built with the `with_*` methods and handed to [`audit_log!`](crate::audit_log)
/// as a whole; fields are not changed after logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// UTC timestamp
    pub timestamp: DateTime<Utc>,

    /// Event category
    pub category: AuditCategory,

    /// Component generating the event
    pub source: String,

    /// Action description
    pub action: String,

    /// Outcome of the action
    pub outcome: AuditOutcome,

    /// Object affected, e.g. `Job/batch/table-refresh`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,

    /// Object kind, e.g. `Job`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,

    /// Additional context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Error message if outcome is failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Cycle id shared by all records of one reconciliation cycle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AuditRecord {
    /// Creates a record stamped now, with outcome InProgress.
    pub fn new(
        category: AuditCategory,
        source: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            object_id: None,
            object_type: None,
            details: None,
            error: None,
            correlation_id: None,
        }
    }

    /// Builds the record for one executed action.
    pub fn for_action(source: &str, result: &ActionResult) -> Self {
        let record = Self::new(
            AuditCategory::for_action(result.kind),
            source,
            format!("{}_object", result.kind),
        )
        .with_object_id(result.identity.to_string())
        .with_object_type(result.identity.kind.clone())
        .with_details(serde_json::json!({
            "target_hash": result.target_hash.as_ref().map(|h| h.as_str()),
            "attempts": result.outcome.attempts(),
            "elapsed_ms": result.elapsed.as_millis() as u64,
        }));

        match &result.outcome {
            ActionOutcome::Applied | ActionOutcome::Retried { .. } => {
                record.with_outcome(AuditOutcome::Success)
            }
            ActionOutcome::Failed { error, .. } => record.with_error(error.clone()),
            ActionOutcome::Cancelled => record.with_outcome(AuditOutcome::Denied),
        }
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_object_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    pub fn with_object_type(mut self, obj_type: impl Into<String>) -> Self {
        self.object_type = Some(obj_type.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Sets the error message and marks the outcome as Failure.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.outcome = AuditOutcome::Failure;
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Serializes the record for the `audit_json` field.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }
}

/// Emits an [`AuditRecord`] on the `audit` target.
///
/// # Usage
/// ```ignore
/// let record = AuditRecord::new(AuditCategory::SystemLifecycle, "UpdateScheduler", "start")
///     .with_outcome(AuditOutcome::Success);
/// audit_log!(record);
/// ```
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        let record = $record;
        match record.outcome {
            $crate::audit::AuditOutcome::Success => {
                tracing::info!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::InProgress => {
                tracing::debug!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::Failure | $crate::audit::AuditOutcome::Denied => {
                tracing::warn!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    error = record.error.as_deref().unwrap_or(""),
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
        }
    };
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level`. With `json` set, every line is
/// a JSON object (thread ids included); otherwise output is human-readable.
pub fn init_logging(
    level: &str,
    json: bool,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .json(),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .try_init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use update_scheduler_common::{FailureKind, ObjectIdentity, SpecHash};

    fn result(kind: ActionKind, outcome: ActionOutcome) -> ActionResult {
        ActionResult::new(
            ObjectIdentity::new("batch", "refresh", "Job"),
            kind,
            Some(SpecHash::new("abc123")),
            outcome,
            Duration::from_millis(42),
        )
    }

    #[test]
    fn test_action_record_success() {
        let record = AuditRecord::for_action(
            "ActionExecutor",
            &result(ActionKind::Patch, ActionOutcome::Retried { attempts: 3 }),
        )
        .with_correlation_id("cycle-1");

        assert_eq!(record.category, AuditCategory::ResourceModify);
        assert_eq!(record.action, "patch_object");
        assert_eq!(record.outcome, AuditOutcome::Success);
        assert_eq!(record.object_id.as_deref(), Some("Job/batch/refresh"));
        assert_eq!(record.object_type.as_deref(), Some("Job"));
        assert_eq!(record.correlation_id.as_deref(), Some("cycle-1"));

        let json = record.to_json();
        assert!(json.contains("RESOURCE_MODIFY"));
        assert!(json.contains("\"attempts\":3"));
        assert!(json.contains("\"elapsed_ms\":42"));
    }

    #[test]
    fn test_action_record_failure_and_cancel() {
        let failed = AuditRecord::for_action(
            "ActionExecutor",
            &result(
                ActionKind::Create,
                ActionOutcome::Failed {
                    kind: FailureKind::Permanent,
                    error: "invalid request: bad image".to_string(),
                    attempts: 1,
                },
            ),
        );
        assert_eq!(failed.category, AuditCategory::ResourceCreate);
        assert_eq!(failed.outcome, AuditOutcome::Failure);
        assert_eq!(failed.error.as_deref(), Some("invalid request: bad image"));

        let cancelled =
            AuditRecord::for_action("ActionExecutor", &result(ActionKind::Delete, ActionOutcome::Cancelled));
        assert_eq!(cancelled.category, AuditCategory::ResourceDelete);
        assert_eq!(cancelled.outcome, AuditOutcome::Denied);
    }

    #[test]
    fn test_audit_category_display() {
        assert_eq!(AuditCategory::ReconcileCycle.to_string(), "RECONCILE_CYCLE");
        assert_eq!(AuditCategory::SystemLifecycle.to_string(), "SYSTEM_LIFECYCLE");
        assert_eq!(AuditOutcome::InProgress.to_string(), "in_progress");
    }
}
