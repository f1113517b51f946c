//! Retry policy for transient failures and the ledger of permanent ones.
//!
//! [`RetryPolicy`] decides how often and how long the executor retries a
//! transient failure within one cycle. [`FailureLedger`] parks identities
//! whose action failed permanently: like a dependency constraint, the entry
//! holds the identity back until the thing it waits on changes, here the
//! desired spec hash.

use crate::identity::ObjectIdentity;
use crate::object::SpecHash;
use crate::plan::ActionKind;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Exponential backoff policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: f64,
}

impl RetryPolicy {
    /// Creates a policy with a doubling multiplier and no jitter.
    ///
    /// `max_attempts` counts the first call, so 1 means "never retry".
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    /// Policy that makes a single attempt.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Sets the growth factor between attempts (at least 1.0).
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Sets the jitter fraction in `[0, 1]`: each delay is reduced by a random
    /// share of up to this fraction.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns true if another attempt is allowed after `attempt` calls.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff after the `attempt`-th failed call (1-based), before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Backoff after the `attempt`-th failed call with jitter applied.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter == 0.0 || base.is_zero() {
            return base;
        }
        let cut = rand::thread_rng().gen_range(0.0..self.jitter);
        base.mul_f64(1.0 - cut)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(200), Duration::from_secs(10)).with_jitter(0.2)
    }
}

/// A permanently failed action waiting for its desired state to change.
#[derive(Debug, Clone, PartialEq)]
pub struct ParkedFailure {
    /// Kind of the failed action
    pub kind: ActionKind,
    /// Hash the failed action targeted (None for deletes)
    pub target_hash: Option<SpecHash>,
    /// Error reported by the orchestrator
    pub error: String,
    /// When the failure was recorded
    pub parked_at: DateTime<Utc>,
}

/// Identities held back after a permanent failure.
#[derive(Debug, Default)]
pub struct FailureLedger {
    entries: HashMap<ObjectIdentity, ParkedFailure>,
}

impl FailureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parks an identity, replacing any earlier entry.
    pub fn park(
        &mut self,
        identity: ObjectIdentity,
        kind: ActionKind,
        target_hash: Option<SpecHash>,
        error: impl Into<String>,
    ) {
        self.entries.insert(
            identity,
            ParkedFailure {
                kind,
                target_hash,
                error: error.into(),
                parked_at: Utc::now(),
            },
        );
    }

    /// Removes an identity's entry.
    pub fn release(&mut self, identity: &ObjectIdentity) -> Option<ParkedFailure> {
        self.entries.remove(identity)
    }

    pub fn get(&self, identity: &ObjectIdentity) -> Option<&ParkedFailure> {
        self.entries.get(identity)
    }

    /// Returns true if a `kind` action towards `target` must be held back.
    ///
    /// Only the exact (kind, target) pair that failed is held back. An entry
    /// for a different target (the desired hash moved on) or a different
    /// kind (a failed create now observed present, a failed patch now
    /// observed absent) is stale and is released.
    pub fn blocks(
        &mut self,
        identity: &ObjectIdentity,
        kind: ActionKind,
        target: Option<&SpecHash>,
    ) -> bool {
        match self.entries.get(identity) {
            Some(parked) if parked.kind == kind && parked.target_hash.as_ref() == target => true,
            Some(_) => {
                debug!(%identity, "Releasing stale parked failure");
                self.entries.remove(identity);
                false
            }
            None => false,
        }
    }

    /// Drops entries the predicate rejects.
    pub fn retain(&mut self, mut keep: impl FnMut(&ObjectIdentity) -> bool) {
        self.entries.retain(|id, _| keep(id));
    }

    /// Human-readable lines for debugging.
    pub fn dump(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .entries
            .iter()
            .map(|(id, p)| format!("{}: {} parked: {}", id, p.kind, p.error))
            .collect();
        lines.sort();
        lines
    }
}
