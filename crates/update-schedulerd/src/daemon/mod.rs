//! Daemon: the reconciliation cycle driven by the scheduler clock.

mod scheduler;

pub use scheduler::{CycleReport, SchedulerStats, SkipReason, UpdateScheduler};
