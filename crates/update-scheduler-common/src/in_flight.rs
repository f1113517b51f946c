//! Registry of identities with an outstanding action.
//!
//! The executor reserves every identity of a plan before it starts working
//! on it, and the reconciler consults the registry to skip identities that
//! are still busy. Each reservation also hands out a per-identity async lock
//! so two actions on the same identity never execute at the same time.
//!
//! Entries are created explicitly by [`InFlightRegistry::reserve`] and
//! removed when the last [`Reservation`] for an identity is dropped; lookups
//! never create entries.

use crate::identity::ObjectIdentity;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct Registry {
    pending: DashMap<ObjectIdentity, usize>,
    locks: DashMap<ObjectIdentity, Arc<Mutex<()>>>,
}

/// Shared, cloneable view of in-flight identities.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    inner: Arc<Registry>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an identity as in flight until the returned reservation drops.
    pub fn reserve(&self, identity: &ObjectIdentity) -> Reservation {
        *self.inner.pending.entry(identity.clone()).or_insert(0) += 1;
        let lock = self
            .inner
            .locks
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Reservation {
            registry: Arc::clone(&self.inner),
            identity: identity.clone(),
            lock: Some(lock),
        }
    }

    pub fn is_in_flight(&self, identity: &ObjectIdentity) -> bool {
        self.inner.pending.contains_key(identity)
    }

    /// Identities currently reserved, in identity order.
    pub fn in_flight(&self) -> BTreeSet<ObjectIdentity> {
        self.inner.pending.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.pending.is_empty()
    }
}

/// Claim on one identity, released on drop.
///
/// A guard obtained from [`Reservation::lock`] should be dropped before the
/// reservation itself so the lock entry can be pruned.
#[derive(Debug)]
pub struct Reservation {
    registry: Arc<Registry>,
    identity: ObjectIdentity,
    lock: Option<Arc<Mutex<()>>>,
}

impl Reservation {
    pub fn identity(&self) -> &ObjectIdentity {
        &self.identity
    }

    /// Waits for exclusive access to the identity.
    pub async fn lock(&self) -> OwnedMutexGuard<()> {
        let lock = match &self.lock {
            Some(lock) => Arc::clone(lock),
            // Only cleared in drop
            None => Arc::new(Mutex::new(())),
        };
        lock.lock_owned().await
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.lock.take();

        let released = match self.registry.pending.get_mut(&self.identity) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };

        if released {
            self.registry
                .pending
                .remove_if(&self.identity, |_, count| *count == 0);
            self.registry
                .locks
                .remove_if(&self.identity, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn id(name: &str) -> ObjectIdentity {
        ObjectIdentity::new("ns", name, "Pod")
    }

    #[test]
    fn test_reserve_and_release() {
        let registry = InFlightRegistry::new();
        assert!(!registry.is_in_flight(&id("a")));

        let first = registry.reserve(&id("a"));
        let second = registry.reserve(&id("a"));
        let other = registry.reserve(&id("b"));
        assert_eq!(registry.len(), 2);
        assert_eq!(first.identity(), &id("a"));

        drop(first);
        assert!(registry.is_in_flight(&id("a")));
        drop(second);
        assert!(!registry.is_in_flight(&id("a")));
        assert_eq!(
            registry.in_flight().into_iter().collect::<Vec<_>>(),
            vec![id("b")]
        );

        drop(other);
        assert!(registry.is_empty());
        assert!(registry.inner.locks.is_empty());
    }

    #[test]
    fn test_lookup_does_not_create_entries() {
        let registry = InFlightRegistry::new();
        assert!(!registry.is_in_flight(&id("ghost")));
        assert!(registry.in_flight().is_empty());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_same_identity_is_serialized() {
        let registry = InFlightRegistry::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let reservation = registry.reserve(&id("a"));
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _guard = reservation.lock().await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_different_identities_run_concurrently() {
        let registry = InFlightRegistry::new();
        let a = registry.reserve(&id("a"));
        let b = registry.reserve(&id("b"));

        let _ga = a.lock().await;
        // Would deadlock if the lock were shared across identities
        let gb = tokio::time::timeout(Duration::from_secs(1), b.lock()).await;
        assert!(gb.is_ok());
    }
}
