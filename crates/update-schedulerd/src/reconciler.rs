//! Reconciler: diffs desired against observed state into a plan.
//!
//! For each desired identity the reconciler emits `Create` if the object is
//! absent (or reported gone), `Patch` if the spec hashes differ, and nothing
//! if they are equal. Each observed identity that is no longer desired gets a
//! `Delete`. Plans list all creates, then all patches, then all deletes, each
//! group in identity order, so the same inputs always give the same plan.
//!
//! An identity is left out of the plan when:
//! - an action on it is still in flight
//! - the observed object is terminating (wait for it to go)
//! - its `not_before` time has not been reached
//! - its last action failed permanently and the desired hash is unchanged
//!
//! Plans are capped at `max_actions`; the tail is dropped and re-evaluated
//! on the next cycle.

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};
use update_scheduler_common::{
    Action, ActionKind, ActionResult, DesiredSnapshot, FailureLedger, InFlightRegistry, ObservedSnapshot,
    ReconciliationPlan,
};

/// Why identities were left out of a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanStats {
    /// Desired and observed hashes match
    pub unchanged: usize,
    /// Action from an earlier cycle still running
    pub in_flight: usize,
    /// Observed object is being deleted
    pub terminating: usize,
    /// `not_before` in the future
    pub deferred: usize,
    /// Held back by a permanent failure
    pub parked: usize,
    /// Dropped by the per-cycle cap
    pub truncated: usize,
}

impl PlanStats {
    /// Identities that need work but were not planned this cycle.
    pub fn held_back(&self) -> usize {
        self.in_flight + self.terminating + self.deferred + self.parked + self.truncated
    }
}

/// Builds plans and remembers permanent failures between cycles.
#[derive(Debug)]
pub struct Reconciler {
    max_actions: usize,
    ledger: FailureLedger,
}

impl Reconciler {
    pub fn new(max_actions: usize) -> Self {
        Self {
            max_actions: max_actions.max(1),
            ledger: FailureLedger::new(),
        }
    }

    /// Computes the plan for one cycle.
    #[instrument(skip_all, fields(cycle = cycle))]
    pub fn plan(
        &mut self,
        cycle: u64,
        desired: &DesiredSnapshot,
        observed: &ObservedSnapshot,
        in_flight: &InFlightRegistry,
        now: DateTime<Utc>,
    ) -> (ReconciliationPlan, PlanStats) {
        let mut stats = PlanStats::default();
        let mut creates = Vec::new();
        let mut patches = Vec::new();
        let mut deletes = Vec::new();

        // Entries for identities gone from both sides can never be released otherwise
        self.ledger
            .retain(|id| desired.contains(id) || observed.contains(id));

        for (identity, target) in desired.iter() {
            if in_flight.is_in_flight(identity) {
                debug!(identity = %identity, "Skipping: action in flight");
                stats.in_flight += 1;
                continue;
            }

            let current = observed.get(identity).filter(|o| !o.status.is_gone());
            if let Some(current) = current {
                if current.status.is_terminating() {
                    debug!(identity = %identity, "Waiting for termination before recreating");
                    stats.terminating += 1;
                    continue;
                }
                if current.spec_hash.as_ref() == Some(target.spec_hash()) {
                    // Converged, possibly by someone else: nothing left to hold back
                    self.ledger.release(identity);
                    stats.unchanged += 1;
                    continue;
                }
            }

            if !target.is_due(now) {
                debug!(identity = %identity, not_before = ?target.not_before(), "Deferred");
                stats.deferred += 1;
                continue;
            }

            let kind = match current {
                None => ActionKind::Create,
                Some(_) => ActionKind::Patch,
            };
            if self.ledger.blocks(identity, kind, Some(target.spec_hash())) {
                debug!(identity = %identity, %kind, "Skipping: parked after permanent failure");
                stats.parked += 1;
                continue;
            }

            match current {
                None => creates.push(Action::Create {
                    target: target.clone(),
                }),
                Some(current) => patches.push(Action::Patch {
                    from: current.spec_hash.clone(),
                    target: target.clone(),
                }),
            }
        }

        for (identity, current) in observed.iter() {
            if desired.contains(identity) || current.status.is_gone() {
                continue;
            }
            if in_flight.is_in_flight(identity) {
                stats.in_flight += 1;
                continue;
            }
            if current.status.is_terminating() {
                stats.terminating += 1;
                continue;
            }
            if self.ledger.blocks(identity, ActionKind::Delete, None) {
                stats.parked += 1;
                continue;
            }
            deletes.push(Action::Delete {
                identity: identity.clone(),
                observed: current.spec_hash.clone(),
            });
        }

        let mut actions = creates;
        actions.append(&mut patches);
        actions.append(&mut deletes);

        if actions.len() > self.max_actions {
            stats.truncated = actions.len() - self.max_actions;
            actions.truncate(self.max_actions);
            info!(
                cap = self.max_actions,
                truncated = stats.truncated,
                "Plan capped, remainder deferred to next cycle"
            );
        }

        (ReconciliationPlan::new(cycle, actions), stats)
    }

    /// Feeds executor results back: permanent failures are parked, successes
    /// release any earlier entry.
    pub fn record_results(&mut self, results: &[ActionResult]) {
        for result in results {
            if result.outcome.is_success() {
                self.ledger.release(&result.identity);
            } else if result.outcome.is_permanent_failure() {
                info!(
                    identity = %result.identity,
                    outcome = %result.outcome,
                    "Parking identity until its desired state changes"
                );
                self.ledger.park(
                    result.identity.clone(),
                    result.kind,
                    result.target_hash.clone(),
                    result.outcome.to_string(),
                );
            }
        }
    }

    pub fn ledger(&self) -> &FailureLedger {
        &self.ledger
    }

    pub fn max_actions(&self) -> usize {
        self.max_actions
    }
}
