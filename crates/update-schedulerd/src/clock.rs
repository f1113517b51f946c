//! Scheduler clock.
//!
//! Fires reconciliation cycles on a fixed interval and on manual triggers.
//! A firing that arrives while a cycle is still running is dropped and
//! counted rather than queued. Manual triggers are debounced: after the
//! first one the clock waits out the debounce window, drains whatever else
//! arrived, and fires once.
//!
//! Cycles run on their own task so the clock keeps ticking (and counting
//! coalesced ticks) while a slow cycle works through its plan.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Tick,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Tick => write!(f, "tick"),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

/// Work run on every firing of the clock.
#[async_trait]
pub trait CycleRunner: Send + Sync + 'static {
    async fn fire(&self, trigger: Trigger, cancel: CancellationToken);
}

/// Clock counters.
#[derive(Debug, Default)]
pub struct ClockStats {
    fired: AtomicU64,
    coalesced: AtomicU64,
    triggers: AtomicU64,
}

impl ClockStats {
    /// Cycles started.
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Firings dropped because a cycle was running.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    /// Manual trigger requests received, before debouncing.
    pub fn triggers(&self) -> u64 {
        self.triggers.load(Ordering::Relaxed)
    }
}

/// Requests an immediate cycle.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<()>,
    stats: Arc<ClockStats>,
}

impl TriggerHandle {
    /// Returns false once the clock has stopped.
    pub fn trigger(&self) -> bool {
        self.stats.triggers.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(()) {
            // A pending trigger already covers this one
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }
}

pub struct SchedulerClock {
    interval: Duration,
    debounce: Duration,
    stats: Arc<ClockStats>,
    tx: mpsc::Sender<()>,
    rx: mpsc::Receiver<()>,
}

impl SchedulerClock {
    pub fn new(interval: Duration, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            interval,
            debounce,
            stats: Arc::new(ClockStats::default()),
            tx,
            rx,
        }
    }

    pub fn trigger_handle(&self) -> TriggerHandle {
        TriggerHandle {
            tx: self.tx.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn stats(&self) -> Arc<ClockStats> {
        Arc::clone(&self.stats)
    }

    /// Runs until `cancel` fires, then waits for the running cycle.
    ///
    /// The first cycle starts immediately.
    pub async fn run(mut self, runner: Arc<dyn CycleRunner>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut running: Option<JoinHandle<()>> = None;

        info!(
            interval_ms = self.interval.as_millis() as u64,
            debounce_ms = self.debounce.as_millis() as u64,
            "Scheduler clock started"
        );

        loop {
            let trigger = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => Trigger::Tick,
                Some(()) = self.rx.recv() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.debounce) => {}
                    }
                    while self.rx.try_recv().is_ok() {}
                    Trigger::Manual
                }
            };

            if let Some(handle) = running.take() {
                if !handle.is_finished() {
                    self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(trigger = %trigger, "Cycle still running, firing dropped");
                    running = Some(handle);
                    continue;
                }
                reap(handle).await;
            }

            self.stats.fired.fetch_add(1, Ordering::Relaxed);
            let runner = Arc::clone(&runner);
            let token = cancel.clone();
            running = Some(tokio::spawn(async move {
                runner.fire(trigger, token).await;
            }));
        }

        info!(
            fired = self.stats.fired(),
            coalesced = self.stats.coalesced(),
            "Scheduler clock stopping"
        );
        if let Some(handle) = running {
            debug!("Waiting for running cycle");
            reap(handle).await;
        }
    }
}

async fn reap(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        error!(error = %e, "Reconciliation cycle task failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct SlowRunner {
        duration: Duration,
        started: Mutex<Vec<Trigger>>,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl CycleRunner for SlowRunner {
        async fn fire(&self, trigger: Trigger, _cancel: CancellationToken) {
            self.started.lock().push(trigger);
            tokio::time::sleep(self.duration).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn runner(duration: Duration) -> Arc<SlowRunner> {
        Arc::new(SlowRunner {
            duration,
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_during_cycle_are_coalesced() {
        let clock = SchedulerClock::new(Duration::from_secs(10), Duration::from_millis(500));
        let stats = clock.stats();
        let runner = runner(Duration::from_secs(25));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(clock.run(runner.clone(), cancel.clone()));

        // Cycles start at 0s and 30s; ticks at 10s and 20s hit the first one
        tokio::time::sleep(Duration::from_secs(35)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(stats.fired(), 2);
        assert_eq!(stats.coalesced(), 2);
        // Shutdown waited for the second cycle
        assert_eq!(runner.finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_cycles_fire_every_tick() {
        let clock = SchedulerClock::new(Duration::from_secs(10), Duration::from_millis(500));
        let stats = clock.stats();
        let runner = runner(Duration::from_secs(1));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(clock.run(runner.clone(), cancel.clone()));
        tokio::time::sleep(Duration::from_secs(45)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(stats.fired(), 5);
        assert_eq!(stats.coalesced(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_triggers_are_debounced() {
        let clock = SchedulerClock::new(Duration::from_secs(3600), Duration::from_millis(500));
        let stats = clock.stats();
        let trigger = clock.trigger_handle();
        let runner = runner(Duration::ZERO);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(clock.run(runner.clone(), cancel.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(trigger.trigger());
        assert!(trigger.trigger());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(trigger.trigger());

        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(stats.triggers(), 3);
        assert_eq!(stats.fired(), 2);
        assert_eq!(*runner.started.lock(), vec![Trigger::Tick, Trigger::Manual]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_during_cycle_is_coalesced() {
        let clock = SchedulerClock::new(Duration::from_secs(3600), Duration::from_millis(100));
        let stats = clock.stats();
        let trigger = clock.trigger_handle();
        let runner = runner(Duration::from_secs(10));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(clock.run(runner.clone(), cancel.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.trigger();
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(stats.fired(), 1);
        assert_eq!(stats.coalesced(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_fails_after_clock_stops() {
        let clock = SchedulerClock::new(Duration::from_secs(60), Duration::from_millis(100));
        let trigger = clock.trigger_handle();
        let cancel = CancellationToken::new();
        cancel.cancel();

        clock.run(runner(Duration::ZERO), cancel).await;
        assert!(!trigger.trigger());
    }
}
