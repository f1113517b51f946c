//! Verification helpers for testing the scheduler
//!
//! Provides assertion helpers to verify orchestrator state after cycles

use std::collections::BTreeSet;
use thiserror::Error;
use update_scheduler_common::{DesiredObject, ObjectIdentity, SpecHash};
use update_schedulerd::orchestrator::MemoryOrchestrator;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected object '{identity}' not found")]
    Missing { identity: ObjectIdentity },

    #[error("Unexpected object '{identity}' still present")]
    Unexpected { identity: ObjectIdentity },

    #[error("Spec hash mismatch for {identity}: expected {expected}, got {actual}")]
    HashMismatch {
        identity: ObjectIdentity,
        expected: SpecHash,
        actual: String,
    },

    #[error("{identity} had {peak} calls in flight at once")]
    ConcurrentCalls { identity: ObjectIdentity, peak: usize },

    #[error("Not converged after {cycles} cycles")]
    NotConverged { cycles: usize },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Orchestrator state verifier
pub struct StateVerifier<'a> {
    orchestrator: &'a MemoryOrchestrator,
}

impl<'a> StateVerifier<'a> {
    pub fn new(orchestrator: &'a MemoryOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Verify that an object exists with the desired spec hash
    pub fn assert_matches(&self, object: &DesiredObject) -> VerifyResult<()> {
        let identity = object.identity();
        let observed = self
            .orchestrator
            .get(identity)
            .ok_or_else(|| VerificationError::Missing {
                identity: identity.clone(),
            })?;

        match observed.spec_hash {
            Some(ref hash) if hash == object.spec_hash() => Ok(()),
            other => Err(VerificationError::HashMismatch {
                identity: identity.clone(),
                expected: object.spec_hash().clone(),
                actual: other.map_or_else(|| "none".to_string(), |h| h.to_string()),
            }),
        }
    }

    /// Verify that an object does not exist
    pub fn assert_absent(&self, identity: &ObjectIdentity) -> VerifyResult<()> {
        if self.orchestrator.get(identity).is_some() {
            return Err(VerificationError::Unexpected {
                identity: identity.clone(),
            });
        }
        Ok(())
    }

    /// Verify that the orchestrator holds exactly `desired`
    pub fn assert_converged(&self, desired: &[DesiredObject]) -> VerifyResult<()> {
        for object in desired {
            self.assert_matches(object)?;
        }

        let wanted: BTreeSet<&ObjectIdentity> = desired.iter().map(|o| o.identity()).collect();
        for identity in self.orchestrator.hashes().into_keys() {
            if !wanted.contains(&identity) {
                return Err(VerificationError::Unexpected { identity });
            }
        }
        Ok(())
    }

    /// Verify that no identity ever had two calls running at once
    pub fn assert_serialized(&self) -> VerifyResult<()> {
        let touched: BTreeSet<ObjectIdentity> = self
            .orchestrator
            .calls()
            .into_iter()
            .map(|c| c.identity)
            .collect();

        for identity in touched {
            let peak = self.orchestrator.peak_concurrency(&identity);
            if peak > 1 {
                return Err(VerificationError::ConcurrentCalls { identity, peak });
            }
        }
        Ok(())
    }
}
