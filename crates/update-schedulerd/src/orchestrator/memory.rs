//! In-process orchestrator.
//!
//! Used for `backend = "memory"` dry runs and as the test double for the
//! executor and the full loop. Supports fault injection (queued errors per
//! identity and call kind, listing failures, latency) and records how many
//! calls ran concurrently on each identity.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use update_scheduler_common::{
    ActionKind, DesiredObject, ObjectIdentity, ObjectStatus, ObservedObject, OrchestratorClient,
    OrchestratorError, OrchestratorResult, SpecHash,
};

#[derive(Debug, Clone)]
struct StoredObject {
    observed: ObservedObject,
    manifest: serde_json::Value,
}

/// One mutating call as recorded by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub kind: ActionKind,
    pub identity: ObjectIdentity,
}

/// In-memory object store implementing [`OrchestratorClient`].
#[derive(Debug, Default)]
pub struct MemoryOrchestrator {
    objects: RwLock<BTreeMap<ObjectIdentity, StoredObject>>,
    faults: Mutex<HashMap<(ObjectIdentity, ActionKind), VecDeque<OrchestratorError>>>,
    list_faults: Mutex<VecDeque<OrchestratorError>>,
    probe_fault: Mutex<Option<OrchestratorError>>,
    latency: Mutex<Duration>,
    graceful_delete: Mutex<bool>,
    calls: Mutex<Vec<RecordedCall>>,
    active: DashMap<ObjectIdentity, usize>,
    peak_per_identity: DashMap<ObjectIdentity, usize>,
    active_total: AtomicUsize,
    peak_total: AtomicUsize,
}

impl MemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an object as if it already existed in the cluster.
    pub fn seed(&self, identity: ObjectIdentity, spec_hash: Option<SpecHash>, status: ObjectStatus) {
        self.objects.write().insert(
            identity.clone(),
            StoredObject {
                observed: ObservedObject::new(identity, spec_hash, status),
                manifest: serde_json::Value::Null,
            },
        );
    }

    /// Inserts an object matching `desired`.
    pub fn seed_desired(&self, desired: &DesiredObject) {
        self.store(desired, ObjectStatus::Running);
    }

    /// Changes the status of a stored object.
    pub fn set_status(&self, identity: &ObjectIdentity, status: ObjectStatus) -> bool {
        match self.objects.write().get_mut(identity) {
            Some(stored) => {
                stored.observed.status = status;
                true
            }
            None => false,
        }
    }

    /// Queues errors returned by the next calls of `kind` on `identity`.
    pub fn fail_next(
        &self,
        identity: &ObjectIdentity,
        kind: ActionKind,
        errors: impl IntoIterator<Item = OrchestratorError>,
    ) {
        self.faults
            .lock()
            .entry((identity.clone(), kind))
            .or_default()
            .extend(errors);
    }

    /// Queues errors returned by the next `list_objects` calls.
    pub fn fail_list(&self, errors: impl IntoIterator<Item = OrchestratorError>) {
        self.list_faults.lock().extend(errors);
    }

    /// Makes `probe` fail until cleared with `None`.
    pub fn set_probe_error(&self, error: Option<OrchestratorError>) {
        *self.probe_fault.lock() = error;
    }

    /// Delay applied to every mutating call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// When set, deletes leave the object `Terminating` until
    /// [`finish_terminations`](Self::finish_terminations) runs.
    pub fn set_graceful_delete(&self, graceful: bool) {
        *self.graceful_delete.lock() = graceful;
    }

    /// Removes every `Terminating` object.
    pub fn finish_terminations(&self) -> usize {
        let mut objects = self.objects.write();
        let before = objects.len();
        objects.retain(|_, stored| !stored.observed.status.is_terminating());
        before - objects.len()
    }

    pub fn get(&self, identity: &ObjectIdentity) -> Option<ObservedObject> {
        self.objects.read().get(identity).map(|s| s.observed.clone())
    }

    /// Manifest last written for an object.
    pub fn manifest(&self, identity: &ObjectIdentity) -> Option<serde_json::Value> {
        self.objects.read().get(identity).map(|s| s.manifest.clone())
    }

    /// Spec hash per stored object.
    pub fn hashes(&self) -> BTreeMap<ObjectIdentity, Option<SpecHash>> {
        self.objects
            .read()
            .iter()
            .map(|(id, s)| (id.clone(), s.observed.spec_hash.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Mutating calls in the order they started.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Number of mutating calls of one kind.
    pub fn call_count(&self, kind: ActionKind) -> usize {
        self.calls.lock().iter().filter(|c| c.kind == kind).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Highest number of calls seen running at once on one identity.
    pub fn peak_concurrency(&self, identity: &ObjectIdentity) -> usize {
        self.peak_per_identity.get(identity).map_or(0, |p| *p)
    }

    /// Highest per-identity concurrency over all identities.
    pub fn max_identity_concurrency(&self) -> usize {
        self.peak_per_identity.iter().map(|p| *p.value()).max().unwrap_or(0)
    }

    /// Highest number of calls seen running at once overall.
    pub fn peak_total_concurrency(&self) -> usize {
        self.peak_total.load(Ordering::SeqCst)
    }

    fn store(&self, desired: &DesiredObject, status: ObjectStatus) {
        self.objects.write().insert(
            desired.identity().clone(),
            StoredObject {
                observed: ObservedObject::new(
                    desired.identity().clone(),
                    Some(desired.spec_hash().clone()),
                    status,
                ),
                manifest: desired.manifest().clone(),
            },
        );
    }

    /// Records the call start, applies latency and injected faults.
    ///
    /// The returned guard marks the call active until dropped, including
    /// when the caller's future is dropped during the simulated latency.
    async fn enter(
        &self,
        kind: ActionKind,
        identity: &ObjectIdentity,
    ) -> OrchestratorResult<ActiveCall<'_>> {
        self.calls.lock().push(RecordedCall {
            kind,
            identity: identity.clone(),
        });

        let now_active = {
            let mut active = self.active.entry(identity.clone()).or_insert(0);
            *active += 1;
            *active
        };
        let call = ActiveCall {
            store: self,
            identity: identity.clone(),
        };
        self.peak_per_identity
            .entry(identity.clone())
            .and_modify(|p| *p = (*p).max(now_active))
            .or_insert(now_active);
        let total = self.active_total.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_total.fetch_max(total, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let fault = self
            .faults
            .lock()
            .get_mut(&(identity.clone(), kind))
            .and_then(|queue| queue.pop_front());

        match fault {
            Some(err) => Err(err),
            None => Ok(call),
        }
    }

    /// Calls currently inside the store.
    pub fn active_calls(&self) -> usize {
        self.active_total.load(Ordering::SeqCst)
    }
}

/// One call in progress; leaves the store on drop.
struct ActiveCall<'a> {
    store: &'a MemoryOrchestrator,
    identity: ObjectIdentity,
}

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        if let Some(mut active) = self.store.active.get_mut(&self.identity) {
            *active = active.saturating_sub(1);
        }
        self.store.active_total.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrchestratorClient for MemoryOrchestrator {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn probe(&self) -> OrchestratorResult<()> {
        match self.probe_fault.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn list_objects(&self) -> OrchestratorResult<Vec<ObservedObject>> {
        if let Some(err) = self.list_faults.lock().pop_front() {
            return Err(err);
        }
        Ok(self
            .objects
            .read()
            .values()
            .map(|s| s.observed.clone())
            .collect())
    }

    async fn create(&self, object: &DesiredObject) -> OrchestratorResult<()> {
        let identity = object.identity();
        let _call = self.enter(ActionKind::Create, identity).await?;

        let exists = self
            .objects
            .read()
            .get(identity)
            .is_some_and(|s| !s.observed.status.is_gone());
        if exists {
            return Err(OrchestratorError::AlreadyExists(identity.to_string()));
        }
        self.store(object, ObjectStatus::Running);
        Ok(())
    }

    async fn patch(&self, object: &DesiredObject) -> OrchestratorResult<()> {
        let identity = object.identity();
        let _call = self.enter(ActionKind::Patch, identity).await?;

        let status = self.objects.read().get(identity).map(|s| s.observed.status);
        match status {
            Some(status) if !status.is_gone() => {
                self.store(object, status);
                Ok(())
            }
            _ => Err(OrchestratorError::NotFound(identity.to_string())),
        }
    }

    async fn delete(&self, identity: &ObjectIdentity) -> OrchestratorResult<()> {
        let _call = self.enter(ActionKind::Delete, identity).await?;

        let graceful = *self.graceful_delete.lock();
        let mut objects = self.objects.write();
        match objects.remove(identity) {
            Some(mut stored) if graceful => {
                stored.observed.status = ObjectStatus::Terminating;
                objects.insert(identity.clone(), stored);
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(OrchestratorError::NotFound(identity.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn desired(name: &str, version: &str) -> DesiredObject {
        DesiredObject::new(ObjectIdentity::new("ns", name, "Pod"), json!({"image": version}))
            .with_version(version)
    }

    #[tokio::test]
    async fn test_create_patch_delete() {
        let store = MemoryOrchestrator::new();
        let v1 = desired("a", "v1");
        let v2 = desired("a", "v2");

        store.create(&v1).await.unwrap();
        assert_eq!(
            store.get(v1.identity()).and_then(|o| o.spec_hash),
            Some(v1.spec_hash().clone())
        );
        assert!(matches!(
            store.create(&v1).await,
            Err(OrchestratorError::AlreadyExists(_))
        ));

        store.patch(&v2).await.unwrap();
        assert_eq!(store.manifest(v2.identity()), Some(json!({"image": "v2"})));

        store.delete(v1.identity()).await.unwrap();
        assert!(store.is_empty());
        assert!(store.delete(v1.identity()).await.unwrap_err().is_not_found());
        assert!(matches!(store.patch(&v2).await, Err(OrchestratorError::NotFound(_))));

        assert_eq!(store.call_count(ActionKind::Create), 2);
        assert_eq!(store.call_count(ActionKind::Delete), 2);
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed_in_order() {
        let store = MemoryOrchestrator::new();
        let object = desired("a", "v1");
        store.fail_next(
            object.identity(),
            ActionKind::Create,
            vec![
                OrchestratorError::Timeout("1".into()),
                OrchestratorError::Invalid("2".into()),
            ],
        );

        assert!(matches!(store.create(&object).await, Err(OrchestratorError::Timeout(_))));
        assert!(matches!(store.create(&object).await, Err(OrchestratorError::Invalid(_))));
        assert!(store.create(&object).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_and_probe_faults() {
        let store = MemoryOrchestrator::new();
        store.seed(ObjectIdentity::new("ns", "a", "Pod"), None, ObjectStatus::Pending);
        store.fail_list(vec![OrchestratorError::Unavailable("down".into())]);

        assert!(store.list_objects().await.is_err());
        assert_eq!(store.list_objects().await.unwrap().len(), 1);

        store.set_probe_error(Some(OrchestratorError::Unavailable("down".into())));
        assert!(store.probe().await.is_err());
        store.set_probe_error(None);
        assert!(store.probe().await.is_ok());
    }

    #[tokio::test]
    async fn test_graceful_delete_terminates_first() {
        let store = MemoryOrchestrator::new();
        let object = desired("a", "v1");
        store.seed_desired(&object);
        store.set_graceful_delete(true);

        store.delete(object.identity()).await.unwrap();
        assert_eq!(
            store.get(object.identity()).map(|o| o.status),
            Some(ObjectStatus::Terminating)
        );
        assert_eq!(store.finish_terminations(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_tracking() {
        let store = std::sync::Arc::new(MemoryOrchestrator::new());
        store.set_latency(Duration::from_millis(20));

        let a = desired("a", "v1");
        let b = desired("b", "v1");
        let (ra, rb) = tokio::join!(store.create(&a), store.create(&b));
        ra.unwrap();
        rb.unwrap();

        assert_eq!(store.peak_concurrency(a.identity()), 1);
        assert_eq!(store.max_identity_concurrency(), 1);
        assert_eq!(store.peak_total_concurrency(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_call_leaves_store() {
        let store = MemoryOrchestrator::new();
        store.set_latency(Duration::from_secs(10));
        let object = desired("a", "v1");

        let abandoned = tokio::time::timeout(Duration::from_secs(1), store.create(&object)).await;
        assert!(abandoned.is_err());
        assert_eq!(store.active_calls(), 0);
        assert!(store.get(object.identity()).is_none());

        // A later call on the same identity is not counted as overlapping
        store.set_latency(Duration::ZERO);
        store.create(&object).await.unwrap();
        assert_eq!(store.peak_concurrency(object.identity()), 1);
        assert_eq!(store.active_calls(), 0);
    }
}
