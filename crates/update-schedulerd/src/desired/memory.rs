//! In-process desired-state source.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use update_scheduler_common::{
    DesiredObject, DesiredSnapshot, DesiredStateError, DesiredStateSource, ObjectIdentity,
};

/// Desired state held in memory and edited through methods.
#[derive(Debug, Default)]
pub struct MemoryDesiredSource {
    objects: RwLock<BTreeMap<ObjectIdentity, DesiredObject>>,
    unavailable: AtomicBool,
    resolves: AtomicU64,
}

impl MemoryDesiredSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source holding `objects`; later duplicates replace earlier ones.
    pub fn with_objects(objects: impl IntoIterator<Item = DesiredObject>) -> Self {
        let source = Self::new();
        source.replace(objects);
        source
    }

    /// Replaces the whole desired state.
    pub fn replace(&self, objects: impl IntoIterator<Item = DesiredObject>) {
        *self.objects.write() = objects
            .into_iter()
            .map(|o| (o.identity().clone(), o))
            .collect();
    }

    /// Inserts or replaces one object.
    pub fn upsert(&self, object: DesiredObject) {
        self.objects.write().insert(object.identity().clone(), object);
    }

    /// Removes one object.
    pub fn remove(&self, identity: &ObjectIdentity) -> Option<DesiredObject> {
        self.objects.write().remove(identity)
    }

    /// Makes `resolve` fail with `Unavailable` until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `resolve` calls so far.
    pub fn resolve_count(&self) -> u64 {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DesiredStateSource for MemoryDesiredSource {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn resolve(&self) -> Result<DesiredSnapshot, DesiredStateError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DesiredStateError::Unavailable(
                "memory source marked unavailable".to_string(),
            ));
        }
        let objects: Vec<DesiredObject> = self.objects.read().values().cloned().collect();
        DesiredSnapshot::try_from_objects(objects)
            .map_err(|id| DesiredStateError::Invalid(format!("duplicate desired object {}", id)))
    }
}
