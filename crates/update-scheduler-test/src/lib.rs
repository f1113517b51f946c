//! Integration test infrastructure for update-scheduler
//!
//! Provides:
//! - Object and file fixtures for desired state
//! - A test harness wiring the scheduler to in-memory collaborators
//! - Orchestrator state verification helpers
//! - A containerized Redis for the Redis desired-state source

pub mod fixtures;
mod harness;
mod redis_env;
mod verification;

pub use fixtures::*;
pub use harness::{HarnessOptions, TestHarness};
pub use redis_env::RedisTestEnv;
pub use verification::*;
