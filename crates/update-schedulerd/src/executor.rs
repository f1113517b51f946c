//! Action executor.
//!
//! Applies one plan against the orchestrator. Each action runs on its own
//! task and must first take a worker-pool permit, then its identity's lock.
//! Transient errors are retried according to the [`RetryPolicy`] and permanent
//! ones are reported at once. Cancellation stops actions that have not
//! started. Actions already talking to the orchestrator finish their current
//! call, and any backoff sleep is cut short.

use crate::audit::AuditRecord;
use crate::audit_log;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};
use update_scheduler_common::{
    Action, ActionKind, ActionOutcome, ActionResult, FailureKind, InFlightRegistry,
    ObjectIdentity, OrchestratorClient, OrchestratorError, ReconciliationPlan, Reservation,
    RetryPolicy, SpecHash,
};

const AUDIT_SOURCE: &str = "ActionExecutor";

/// Bounded-concurrency plan executor.
pub struct ActionExecutor {
    client: Arc<dyn OrchestratorClient>,
    policy: RetryPolicy,
    workers: Arc<Semaphore>,
    worker_pool_size: usize,
    registry: InFlightRegistry,
}

/// Everything a single action task needs, shared across the plan.
struct Worker {
    client: Arc<dyn OrchestratorClient>,
    policy: RetryPolicy,
    workers: Arc<Semaphore>,
    cancel: CancellationToken,
    correlation_id: Option<String>,
}

impl ActionExecutor {
    pub fn new(
        client: Arc<dyn OrchestratorClient>,
        policy: RetryPolicy,
        worker_pool_size: usize,
        registry: InFlightRegistry,
    ) -> Self {
        let worker_pool_size = worker_pool_size.max(1);
        Self {
            client,
            policy,
            workers: Arc::new(Semaphore::new(worker_pool_size)),
            worker_pool_size,
            registry,
        }
    }

    pub fn registry(&self) -> &InFlightRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size
    }

    /// Applies the plan and returns one result per action, in plan order.
    pub async fn apply(
        &self,
        plan: ReconciliationPlan,
        cancel: &CancellationToken,
    ) -> Vec<ActionResult> {
        self.apply_with_correlation(plan, cancel, None).await
    }

    /// Same as [`apply`](Self::apply), tagging audit records with the cycle id.
    #[instrument(skip_all, fields(cycle = plan.cycle(), actions = plan.len()))]
    pub async fn apply_with_correlation(
        &self,
        plan: ReconciliationPlan,
        cancel: &CancellationToken,
        correlation_id: Option<String>,
    ) -> Vec<ActionResult> {
        let actions = plan.into_actions();
        if actions.is_empty() {
            return Vec::new();
        }

        let worker = Arc::new(Worker {
            client: Arc::clone(&self.client),
            policy: self.policy.clone(),
            workers: Arc::clone(&self.workers),
            cancel: cancel.clone(),
            correlation_id,
        });

        // Reserve every identity before anything runs, so a concurrent plan
        // can never pick one of them up.
        let reservations: Vec<Reservation> = actions
            .iter()
            .map(|action| self.registry.reserve(action.identity()))
            .collect();

        let fallbacks: Vec<(ObjectIdentity, ActionKind, Option<SpecHash>)> = actions
            .iter()
            .map(|a| (a.identity().clone(), a.kind(), a.target_hash().cloned()))
            .collect();

        let mut tasks = JoinSet::new();
        let mut task_index = HashMap::with_capacity(actions.len());
        for (index, (action, reservation)) in actions.into_iter().zip(reservations).enumerate() {
            let worker = Arc::clone(&worker);
            let handle = tasks.spawn(async move { worker.run(action, reservation).await });
            task_index.insert(handle.id(), index);
        }

        let mut results: Vec<Option<ActionResult>> = vec![None; fallbacks.len()];
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, result)) => {
                    if let Some(&index) = task_index.get(&id) {
                        results[index] = Some(result);
                    }
                }
                Err(e) => {
                    let Some(&index) = task_index.get(&e.id()) else {
                        continue;
                    };
                    let (identity, kind, target_hash) = fallbacks[index].clone();
                    error!(identity = %identity, error = %e, "Action task died");
                    let result = ActionResult::new(
                        identity,
                        kind,
                        target_hash,
                        ActionOutcome::Failed {
                            kind: FailureKind::Permanent,
                            error: format!("action task failed: {}", e),
                            attempts: 0,
                        },
                        Duration::ZERO,
                    );
                    worker.audit(&result);
                    results[index] = Some(result);
                }
            }
        }

        results
            .into_iter()
            .zip(fallbacks)
            .map(|(result, (identity, kind, target_hash))| {
                result.unwrap_or_else(|| {
                    ActionResult::new(
                        identity,
                        kind,
                        target_hash,
                        ActionOutcome::Cancelled,
                        Duration::ZERO,
                    )
                })
            })
            .collect()
    }
}

impl Worker {
    #[instrument(skip_all, fields(identity = %action.identity(), kind = %action.kind()))]
    async fn run(&self, action: Action, reservation: Reservation) -> ActionResult {
        let started = Instant::now();
        let identity = action.identity().clone();
        let kind = action.kind();
        let target_hash = action.target_hash().cloned();

        let outcome = self.execute(&action, &reservation).await;
        drop(reservation);

        let result = ActionResult::new(identity, kind, target_hash, outcome, started.elapsed());
        self.audit(&result);
        result
    }

    async fn execute(&self, action: &Action, reservation: &Reservation) -> ActionOutcome {
        if self.cancel.is_cancelled() {
            return ActionOutcome::Cancelled;
        }

        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return ActionOutcome::Cancelled,
            permit = Arc::clone(&self.workers).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return ActionOutcome::Cancelled,
            },
        };

        let _guard = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return ActionOutcome::Cancelled,
            guard = reservation.lock() => guard,
        };

        self.with_retry(action).await
    }

    async fn with_retry(&self, action: &Action) -> ActionOutcome {
        let mut attempt = 1;
        loop {
            let err = match self.call(action).await {
                Ok(()) => return succeeded(attempt),
                // Already gone is what a delete wants
                Err(e) if action.kind() == ActionKind::Delete && e.is_not_found() => {
                    debug!("Object already absent");
                    return succeeded(attempt);
                }
                Err(e) => e,
            };

            if !err.is_transient() {
                warn!(error = %err, attempt, "Action rejected");
                return ActionOutcome::Failed {
                    kind: FailureKind::Permanent,
                    error: err.to_string(),
                    attempts: attempt,
                };
            }

            if !self.policy.should_retry(attempt) {
                warn!(error = %err, attempts = attempt, "Retries exhausted");
                return exhausted(&err, attempt);
            }

            let delay = self.policy.delay(attempt);
            debug!(error = %err, attempt, delay_ms = delay.as_millis() as u64, "Retrying");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return exhausted(&err, attempt),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn call(&self, action: &Action) -> Result<(), OrchestratorError> {
        match action {
            Action::Create { target } => self.client.create(target).await,
            Action::Patch { target, .. } => self.client.patch(target).await,
            Action::Delete { identity, .. } => self.client.delete(identity).await,
        }
    }

    fn audit(&self, result: &ActionResult) {
        let mut record = AuditRecord::for_action(AUDIT_SOURCE, result);
        if let Some(id) = &self.correlation_id {
            record = record.with_correlation_id(id.clone());
        }
        audit_log!(record);
    }
}

fn succeeded(attempts: u32) -> ActionOutcome {
    if attempts == 1 {
        ActionOutcome::Applied
    } else {
        ActionOutcome::Retried { attempts }
    }
}

fn exhausted(err: &OrchestratorError, attempts: u32) -> ActionOutcome {
    ActionOutcome::Failed {
        kind: FailureKind::Exhausted,
        error: err.to_string(),
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::MemoryOrchestrator;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use update_scheduler_common::{
        DesiredObject, MockOrchestratorClient, OutcomeSummary,
    };

    fn id(name: &str) -> ObjectIdentity {
        ObjectIdentity::new("ns", name, "Job")
    }

    fn want(name: &str, version: &str) -> DesiredObject {
        DesiredObject::new(id(name), json!({"image": "worker"})).with_version(version)
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(10), Duration::from_millis(100))
    }

    fn executor(client: Arc<dyn OrchestratorClient>, pool: usize) -> ActionExecutor {
        ActionExecutor::new(client, fast_policy(3), pool, InFlightRegistry::new())
    }

    #[tokio::test]
    async fn test_apply_returns_results_in_plan_order() {
        let orch = Arc::new(MemoryOrchestrator::new());
        orch.seed_desired(&want("b", "v1"));
        orch.seed_desired(&want("c", "v1"));

        let plan = ReconciliationPlan::new(
            1,
            vec![
                Action::Create { target: want("a", "v1") },
                Action::Patch {
                    from: Some(want("b", "v1").spec_hash().clone()),
                    target: want("b", "v2"),
                },
                Action::Delete { identity: id("c"), observed: None },
            ],
        );

        let exec = executor(orch.clone(), 2);
        let results = exec.apply(plan, &CancellationToken::new()).await;

        let order: Vec<(String, ActionKind)> =
            results.iter().map(|r| (r.identity.name.clone(), r.kind)).collect();
        assert_eq!(
            order,
            vec![
                ("a".to_string(), ActionKind::Create),
                ("b".to_string(), ActionKind::Patch),
                ("c".to_string(), ActionKind::Delete),
            ]
        );
        assert!(results.iter().all(|r| r.outcome == ActionOutcome::Applied));
        assert_eq!(orch.get(&id("b")).map(|o| o.spec_hash), Some(Some(want("b", "v2").spec_hash().clone())));
        assert!(orch.get(&id("c")).is_none());
        assert!(exec.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let orch = Arc::new(MemoryOrchestrator::new());
        orch.fail_next(
            &id("a"),
            ActionKind::Create,
            vec![
                OrchestratorError::Unavailable("connection reset".to_string()),
                OrchestratorError::Server { status: 503, message: "busy".to_string() },
            ],
        );

        let exec = executor(orch.clone(), 1);
        let plan = ReconciliationPlan::new(1, vec![Action::Create { target: want("a", "v1") }]);
        let results = exec.apply(plan, &CancellationToken::new()).await;

        assert_eq!(results[0].outcome, ActionOutcome::Retried { attempts: 3 });
        assert_eq!(orch.call_count(ActionKind::Create), 3);
        assert!(orch.get(&id("a")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let orch = Arc::new(MemoryOrchestrator::new());
        orch.fail_next(
            &id("a"),
            ActionKind::Create,
            vec![OrchestratorError::Timeout("slow".to_string()); 5],
        );

        let exec = executor(orch.clone(), 1);
        let plan = ReconciliationPlan::new(1, vec![Action::Create { target: want("a", "v1") }]);
        let results = exec.apply(plan, &CancellationToken::new()).await;

        match &results[0].outcome {
            ActionOutcome::Failed { kind, attempts, .. } => {
                assert_eq!(*kind, FailureKind::Exhausted);
                assert_eq!(*attempts, 3);
            }
            other => panic!("unexpected outcome {}", other),
        }
        assert_eq!(orch.call_count(ActionKind::Create), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let mut client = MockOrchestratorClient::new();
        client
            .expect_patch()
            .times(1)
            .returning(|_| Err(OrchestratorError::Invalid("spec.replicas: must be >= 0".to_string())));

        let exec = executor(Arc::new(client), 1);
        let plan = ReconciliationPlan::new(
            1,
            vec![Action::Patch { from: None, target: want("a", "v2") }],
        );
        let results = exec.apply(plan, &CancellationToken::new()).await;

        assert!(results[0].outcome.is_permanent_failure());
        assert_eq!(results[0].outcome.attempts(), 1);
    }

    #[tokio::test]
    async fn test_delete_of_absent_object_is_applied() {
        let orch = Arc::new(MemoryOrchestrator::new());
        let exec = executor(orch.clone(), 1);
        let plan = ReconciliationPlan::new(
            1,
            vec![Action::Delete { identity: id("ghost"), observed: None }],
        );
        let results = exec.apply(plan, &CancellationToken::new()).await;
        assert_eq!(results[0].outcome, ActionOutcome::Applied);
    }

    #[tokio::test]
    async fn test_create_of_existing_object_is_permanent() {
        let orch = Arc::new(MemoryOrchestrator::new());
        orch.seed_desired(&want("a", "v1"));
        let exec = executor(orch.clone(), 1);
        let plan = ReconciliationPlan::new(1, vec![Action::Create { target: want("a", "v2") }]);
        let results = exec.apply(plan, &CancellationToken::new()).await;
        assert!(results[0].outcome.is_permanent_failure());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let orch = Arc::new(MemoryOrchestrator::new());
        let exec = executor(orch.clone(), 1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let plan = ReconciliationPlan::new(
            1,
            vec![
                Action::Create { target: want("a", "v1") },
                Action::Create { target: want("b", "v1") },
            ],
        );
        let results = exec.apply(plan, &cancel).await;

        assert!(results.iter().all(|r| r.outcome == ActionOutcome::Cancelled));
        assert!(orch.calls().is_empty());
        assert!(exec.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_queued_actions_and_lets_running_finish() {
        let orch = Arc::new(MemoryOrchestrator::new());
        orch.set_latency(Duration::from_secs(5));
        let exec = Arc::new(executor(orch.clone(), 1));
        let cancel = CancellationToken::new();

        let plan = ReconciliationPlan::new(
            1,
            vec![
                Action::Create { target: want("a", "v1") },
                Action::Create { target: want("b", "v1") },
                Action::Create { target: want("c", "v1") },
            ],
        );

        let running = {
            let exec = Arc::clone(&exec);
            let cancel = cancel.clone();
            tokio::spawn(async move { exec.apply(plan, &cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        let results = running.await.unwrap();

        let summary = OutcomeSummary::from_results(&results);
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.cancelled, 2);
        assert_eq!(orch.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_cuts_backoff_short() {
        let orch = Arc::new(MemoryOrchestrator::new());
        orch.fail_next(
            &id("a"),
            ActionKind::Create,
            vec![OrchestratorError::RateLimited("slow down".to_string())],
        );
        let exec = ActionExecutor::new(
            orch.clone(),
            RetryPolicy::new(5, Duration::from_secs(60), Duration::from_secs(60)),
            1,
            InFlightRegistry::new(),
        );
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let started = tokio::time::Instant::now();
        let plan = ReconciliationPlan::new(1, vec![Action::Create { target: want("a", "v1") }]);
        let results = exec.apply(plan, &cancel).await;

        assert!(started.elapsed() < Duration::from_secs(60));
        assert!(results[0].outcome.is_retryable());
        assert_eq!(orch.call_count(ActionKind::Create), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_bounds_concurrency() {
        let orch = Arc::new(MemoryOrchestrator::new());
        orch.set_latency(Duration::from_millis(50));
        let exec = executor(orch.clone(), 2);

        let actions = (0..8)
            .map(|i| Action::Create { target: want(&format!("job-{}", i), "v1") })
            .collect();
        let results = exec
            .apply(ReconciliationPlan::new(1, actions), &CancellationToken::new())
            .await;

        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|r| r.outcome.is_success()));
        assert_eq!(orch.peak_total_concurrency(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_registered_while_running() {
        let orch = Arc::new(MemoryOrchestrator::new());
        orch.set_latency(Duration::from_secs(2));
        let exec = Arc::new(executor(orch.clone(), 1));

        let running = {
            let exec = Arc::clone(&exec);
            tokio::spawn(async move {
                let plan =
                    ReconciliationPlan::new(1, vec![Action::Create { target: want("a", "v1") }]);
                exec.apply(plan, &CancellationToken::new()).await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(exec.registry().is_in_flight(&id("a")));

        running.await.unwrap();
        assert!(!exec.registry().is_in_flight(&id("a")));
    }
}
