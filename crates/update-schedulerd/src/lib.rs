//! update-schedulerd - periodic update-scheduling controller
//!
//! Reconciles a declared target state against the objects an orchestrator
//! reports, and issues create, patch and delete calls until the two agree.
//!
//! # Architecture
//!
//! ```text
//! [SchedulerClock] ──> [UpdateScheduler::run_cycle]
//!                         │
//!        ┌────────────────┴────────────────┐
//!        ↓                                 ↓
//!   [Observer]                    [DesiredStateSource]
//!   (orchestrator list)           (file / Redis / memory)
//!        └────────────────┬────────────────┘
//!                         ↓
//!                    [Reconciler] ──> ReconciliationPlan
//!                         ↑                 │
//!                  ActionResults            ↓
//!                         └────────── [ActionExecutor] ──> [OrchestratorClient]
//! ```
//!
//! # Key Components
//!
//! - [`daemon::UpdateScheduler`]: one observe, diff and apply pass
//! - [`clock::SchedulerClock`]: interval ticks, coalescing, manual triggers
//! - [`reconciler::Reconciler`]: plan computation and failure parking
//! - [`executor::ActionExecutor`]: retries, worker pool, per-identity locks
//!
//! # Feature Flags
//!
//! - `redis` (default): Redis-backed desired-state source

pub mod audit;
pub mod clock;
pub mod config;
pub mod daemon;
pub mod desired;
pub mod error;
pub mod executor;
pub mod observer;
pub mod orchestrator;
pub mod reconciler;

pub use clock::{ClockStats, CycleRunner, SchedulerClock, Trigger, TriggerHandle};
pub use config::SchedulerConfig;
pub use daemon::{CycleReport, SchedulerStats, SkipReason, UpdateScheduler};
pub use error::{ConfigError, Result, SchedulerError};
pub use executor::ActionExecutor;
pub use observer::PollingObserver;
pub use reconciler::{PlanStats, Reconciler};
