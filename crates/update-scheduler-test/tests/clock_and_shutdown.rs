//! Scheduler clock, overlapping cycles and shutdown
//!
//! Runs on a paused tokio clock; orchestrator latency makes cycles slow
//! enough for ticks to land while actions are still running.

use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use update_scheduler_common::OutcomeSummary;
use update_scheduler_test::{pod, HarnessOptions, StateVerifier, TestHarness};
use update_schedulerd::{CycleReport, SchedulerClock};

#[tokio::test(start_paused = true)]
async fn test_dropped_ticks_still_converge() {
    let h = TestHarness::with_options(HarnessOptions {
        worker_pool_size: 2,
        ..Default::default()
    });
    h.orchestrator.set_latency(Duration::from_secs(3));
    let desired: Vec<_> = (0..6).map(|i| pod("apps", &format!("p{}", i), "v1")).collect();
    h.desired.replace(desired.clone());

    let clock = SchedulerClock::new(Duration::from_secs(1), Duration::from_millis(100));
    let stats = clock.stats();
    let cancel = CancellationToken::new();
    let running = tokio::spawn(clock.run(h.scheduler.clone(), cancel.clone()));

    tokio::time::sleep(Duration::from_secs(30)).await;
    cancel.cancel();
    running.await.unwrap();

    assert!(stats.coalesced() > 0, "slow cycle should have dropped ticks");
    StateVerifier::new(&h.orchestrator).assert_converged(&desired).unwrap();
    StateVerifier::new(&h.orchestrator).assert_serialized().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_queued_actions_and_waits_for_running_ones() {
    let h = TestHarness::with_options(HarnessOptions {
        worker_pool_size: 1,
        ..Default::default()
    });
    h.orchestrator.set_latency(Duration::from_secs(5));
    h.desired.replace((0..4).map(|i| pod("apps", &format!("p{}", i), "v1")));

    let clock = SchedulerClock::new(Duration::from_secs(60), Duration::from_millis(100));
    let cancel = CancellationToken::new();
    let running = tokio::spawn(clock.run(h.scheduler.clone(), cancel.clone()));

    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();
    running.await.unwrap();

    // The in-flight create finished; the other three never started
    assert_eq!(h.orchestrator.len(), 1);
    let stats = h.scheduler.stats();
    assert_eq!(stats.actions_succeeded, 1);
    assert_eq!(stats.actions_cancelled, 3);
    assert!(h.scheduler.in_flight().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_cycles_skip_in_flight_identities() {
    let h = TestHarness::new();
    h.orchestrator.set_latency(Duration::from_secs(2));
    h.desired.replace((0..5).map(|i| pod("apps", &format!("p{}", i), "v1")));

    let (first, second) = tokio::join!(h.cycle(), h.cycle());

    let mut sizes = vec![first.results().len(), second.results().len()];
    sizes.sort();
    assert_eq!(sizes, vec![0, 5]);

    let idle = if first.results().is_empty() { &first } else { &second };
    match idle {
        CycleReport::Completed { plan_stats, .. } => assert_eq!(plan_stats.in_flight, 5),
        other => panic!("unexpected report {:?}", other),
    }

    let all: Vec<_> = first.results().iter().chain(second.results()).cloned().collect();
    assert_eq!(OutcomeSummary::from_results(&all).failed(), 0);
    StateVerifier::new(&h.orchestrator).assert_serialized().unwrap();
    assert_eq!(h.orchestrator.max_identity_concurrency(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_manual_trigger_reconciles_without_waiting_for_tick() {
    let h = TestHarness::new();
    let clock = SchedulerClock::new(Duration::from_secs(3600), Duration::from_millis(200));
    let trigger = clock.trigger_handle();
    let stats = clock.stats();
    let cancel = CancellationToken::new();
    let running = tokio::spawn(clock.run(h.scheduler.clone(), cancel.clone()));

    // Startup cycle sees nothing to do
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.orchestrator.is_empty());

    h.desired.upsert(pod("apps", "hotfix", "v1"));
    assert!(trigger.trigger());
    assert!(trigger.trigger());
    tokio::time::sleep(Duration::from_secs(1)).await;

    StateVerifier::new(&h.orchestrator)
        .assert_matches(&pod("apps", "hotfix", "v1"))
        .unwrap();
    assert_eq!(stats.fired(), 2);

    cancel.cancel();
    running.await.unwrap();
}
