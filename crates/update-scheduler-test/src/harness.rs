//! Scheduler wired to in-memory collaborators

use crate::verification::{VerificationError, VerifyResult};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use update_scheduler_common::{InFlightRegistry, OrchestratorClient, RetryPolicy};
use update_schedulerd::desired::MemoryDesiredSource;
use update_schedulerd::orchestrator::MemoryOrchestrator;
use update_schedulerd::{
    ActionExecutor, CycleReport, PollingObserver, Reconciler, Trigger, UpdateScheduler,
};

/// Knobs for [`TestHarness`]
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    pub worker_pool_size: usize,
    pub max_actions_per_cycle: usize,
    pub retry: RetryPolicy,
    pub observer_timeout: Duration,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            max_actions_per_cycle: 100,
            retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(10)),
            observer_timeout: Duration::from_secs(5),
        }
    }
}

/// In-memory orchestrator and desired state behind a real scheduler
pub struct TestHarness {
    pub orchestrator: Arc<MemoryOrchestrator>,
    pub desired: Arc<MemoryDesiredSource>,
    pub scheduler: Arc<UpdateScheduler>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_options(HarnessOptions::default())
    }

    pub fn with_options(options: HarnessOptions) -> Self {
        let orchestrator = Arc::new(MemoryOrchestrator::new());
        let desired = Arc::new(MemoryDesiredSource::new());
        let client: Arc<dyn OrchestratorClient> = orchestrator.clone();

        let scheduler = UpdateScheduler::new(
            Arc::new(PollingObserver::new(
                Arc::clone(&client),
                options.observer_timeout,
            )),
            desired.clone(),
            Reconciler::new(options.max_actions_per_cycle),
            ActionExecutor::new(
                client,
                options.retry,
                options.worker_pool_size,
                InFlightRegistry::new(),
            ),
        );

        Self {
            orchestrator,
            desired,
            scheduler: Arc::new(scheduler),
        }
    }

    /// Run one cycle to completion
    pub async fn cycle(&self) -> CycleReport {
        self.scheduler
            .run_cycle(Trigger::Tick, &CancellationToken::new())
            .await
    }

    /// Run cycles until one completes with nothing to do
    ///
    /// Returns the number of cycles run, including the idle one.
    pub async fn converge(&self, max_cycles: usize) -> VerifyResult<usize> {
        for n in 1..=max_cycles {
            let report = self.cycle().await;
            if !report.is_skipped() && report.results().is_empty() {
                return Ok(n);
            }
        }
        Err(VerificationError::NotConverged { cycles: max_cycles })
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
