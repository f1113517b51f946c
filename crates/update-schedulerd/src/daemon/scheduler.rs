//! UpdateScheduler implementation.
//!
//! The UpdateScheduler runs one reconciliation cycle per clock firing:
//! - Observer snapshot and desired-state resolution, concurrently
//! - Diff into a plan via the [`Reconciler`]
//! - Apply the plan via the [`ActionExecutor`]
//! - Feed results back into the reconciler's failure ledger

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::clock::{CycleRunner, Trigger};
use crate::config::SchedulerConfig;
use crate::executor::ActionExecutor;
use crate::observer::PollingObserver;
use crate::reconciler::{PlanStats, Reconciler};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use update_scheduler_common::{
    ActionKind, ActionResult, DesiredStateSource, InFlightRegistry, Observer, OrchestratorClient,
    OutcomeSummary,
};
use uuid::Uuid;

const AUDIT_SOURCE: &str = "UpdateScheduler";

/// Why a cycle did not reach the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Cancelled before observing
    Shutdown,
    /// Observer failed, timed out or returned a stale snapshot
    Observer(String),
    /// Desired state could not be read or validated
    DesiredState(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Shutdown => write!(f, "shutting down"),
            SkipReason::Observer(e) => write!(f, "observer: {}", e),
            SkipReason::DesiredState(e) => write!(f, "desired state: {}", e),
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone)]
pub enum CycleReport {
    Skipped {
        cycle: u64,
        reason: SkipReason,
    },
    Completed {
        cycle: u64,
        /// Identities left out of the plan and why
        plan_stats: PlanStats,
        outcomes: OutcomeSummary,
        /// One per planned action, in plan order
        results: Vec<ActionResult>,
    },
}

impl CycleReport {
    pub fn cycle(&self) -> u64 {
        match self {
            CycleReport::Skipped { cycle, .. } | CycleReport::Completed { cycle, .. } => *cycle,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, CycleReport::Skipped { .. })
    }

    pub fn results(&self) -> &[ActionResult] {
        match self {
            CycleReport::Skipped { .. } => &[],
            CycleReport::Completed { results, .. } => results,
        }
    }
}

/// Running totals across cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub actions_succeeded: u64,
    pub actions_failed: u64,
    pub actions_cancelled: u64,
    pub last_completed_at: Option<DateTime<Utc>>,
}

/// The reconciliation loop body.
pub struct UpdateScheduler {
    observer: Arc<dyn Observer>,
    desired: Arc<dyn DesiredStateSource>,
    reconciler: Mutex<Reconciler>,
    executor: ActionExecutor,
    next_cycle: AtomicU64,
    stats: Mutex<SchedulerStats>,
}

impl UpdateScheduler {
    pub fn new(
        observer: Arc<dyn Observer>,
        desired: Arc<dyn DesiredStateSource>,
        reconciler: Reconciler,
        executor: ActionExecutor,
    ) -> Self {
        Self {
            observer,
            desired,
            reconciler: Mutex::new(reconciler),
            executor,
            next_cycle: AtomicU64::new(1),
            stats: Mutex::new(SchedulerStats::default()),
        }
    }

    /// Wires the polling observer, reconciler and executor from config.
    pub fn from_config(
        config: &SchedulerConfig,
        client: Arc<dyn OrchestratorClient>,
        desired: Arc<dyn DesiredStateSource>,
    ) -> Self {
        let observer = Arc::new(PollingObserver::new(
            Arc::clone(&client),
            config.observer_timeout(),
        ));
        let executor = ActionExecutor::new(
            client,
            config.retry.policy(),
            config.executor.worker_pool_size,
            InFlightRegistry::new(),
        );
        Self::new(
            observer,
            desired,
            Reconciler::new(config.executor.max_actions_per_cycle),
            executor,
        )
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.lock().clone()
    }

    pub fn in_flight(&self) -> &InFlightRegistry {
        self.executor.registry()
    }

    /// Runs one observe, diff and apply pass.
    #[instrument(skip_all, fields(cycle = tracing::field::Empty, trigger = %trigger))]
    pub async fn run_cycle(&self, trigger: Trigger, cancel: &CancellationToken) -> CycleReport {
        let cycle = self.next_cycle.fetch_add(1, Ordering::Relaxed);
        tracing::Span::current().record("cycle", cycle);
        let correlation_id = Uuid::new_v4().to_string();

        if cancel.is_cancelled() {
            return self.skip(cycle, &correlation_id, SkipReason::Shutdown);
        }

        debug!(source = %self.desired.describe(), "Starting cycle");
        let (observed, desired) = tokio::join!(self.observer.snapshot(), self.desired.resolve());

        let observed = match observed {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Observation failed, skipping cycle");
                return self.skip(cycle, &correlation_id, SkipReason::Observer(e.to_string()));
            }
        };
        let desired = match desired {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Desired state unavailable, skipping cycle");
                return self.skip(cycle, &correlation_id, SkipReason::DesiredState(e.to_string()));
            }
        };

        let (plan, plan_stats) = self.reconciler.lock().plan(
            cycle,
            &desired,
            &observed,
            self.executor.registry(),
            Utc::now(),
        );

        if !plan.is_empty() {
            info!(
                observed = observed.len(),
                desired = desired.len(),
                creates = plan.count(ActionKind::Create),
                patches = plan.count(ActionKind::Patch),
                deletes = plan.count(ActionKind::Delete),
                held_back = plan_stats.held_back(),
                "Plan ready"
            );
            for line in plan.dump() {
                debug!("  {}", line);
            }

            let record = AuditRecord::new(AuditCategory::ReconcileCycle, AUDIT_SOURCE, "cycle_start")
                .with_outcome(AuditOutcome::InProgress)
                .with_correlation_id(correlation_id.clone())
                .with_details(serde_json::json!({
                    "cycle": cycle,
                    "trigger": trigger.to_string(),
                    "actions": plan.len(),
                }));
            audit_log!(record);
        }

        let results = self
            .executor
            .apply_with_correlation(plan, cancel, Some(correlation_id.clone()))
            .await;
        self.reconciler.lock().record_results(&results);

        let outcomes = OutcomeSummary::from_results(&results);
        if !results.is_empty() {
            info!(
                succeeded = outcomes.succeeded(),
                failed = outcomes.failed(),
                cancelled = outcomes.cancelled,
                parked = self.reconciler.lock().ledger().len(),
                "Cycle complete"
            );
            let mut record =
                AuditRecord::new(AuditCategory::ReconcileCycle, AUDIT_SOURCE, "cycle_end")
                    .with_outcome(AuditOutcome::Success)
                    .with_correlation_id(correlation_id)
                    .with_details(serde_json::json!({
                        "cycle": cycle,
                        "succeeded": outcomes.succeeded(),
                        "failed": outcomes.failed(),
                        "cancelled": outcomes.cancelled,
                    }));
            if outcomes.failed() > 0 {
                record = record.with_error(format!("{} action(s) failed", outcomes.failed()));
            }
            audit_log!(record);
        } else {
            debug!(unchanged = plan_stats.unchanged, "Nothing to do");
        }

        {
            let mut stats = self.stats.lock();
            stats.cycles_completed += 1;
            stats.actions_succeeded += outcomes.succeeded() as u64;
            stats.actions_failed += outcomes.failed() as u64;
            stats.actions_cancelled += outcomes.cancelled as u64;
            stats.last_completed_at = Some(Utc::now());
        }

        CycleReport::Completed {
            cycle,
            plan_stats,
            outcomes,
            results,
        }
    }

    fn skip(&self, cycle: u64, correlation_id: &str, reason: SkipReason) -> CycleReport {
        self.stats.lock().cycles_skipped += 1;

        if reason != SkipReason::Shutdown {
            let record = AuditRecord::new(AuditCategory::ErrorCondition, AUDIT_SOURCE, "cycle_skipped")
                .with_correlation_id(correlation_id)
                .with_details(serde_json::json!({ "cycle": cycle }))
                .with_error(reason.to_string());
            audit_log!(record);
        }

        CycleReport::Skipped { cycle, reason }
    }

    /// Dumps state for debugging.
    pub fn dump(&self) -> Vec<String> {
        let stats = self.stats();
        let mut lines = vec![format!(
            "UpdateScheduler cycles: {} completed, {} skipped",
            stats.cycles_completed, stats.cycles_skipped
        )];

        for identity in self.in_flight().in_flight() {
            lines.push(format!("  in flight: {}", identity));
        }
        for line in self.reconciler.lock().ledger().dump() {
            lines.push(format!("  {}", line));
        }

        lines
    }
}

#[async_trait]
impl CycleRunner for UpdateScheduler {
    async fn fire(&self, trigger: Trigger, cancel: CancellationToken) {
        self.run_cycle(trigger, &cancel).await;
    }
}
