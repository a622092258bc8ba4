use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::model::DiscoverableDevice;

/// Snapshot of the devices a manager had connected.
pub type RestorationSnapshot = Vec<DiscoverableDevice>;

/// Shared store of restoration snapshots keyed by a caller-chosen identifier.
///
/// Clones share the same storage. Concurrent writers resolve last-writer-wins.
#[derive(Debug, Clone, Default)]
pub struct RestorationStore {
    snapshots: Arc<RwLock<HashMap<String, RestorationSnapshot>>>,
}

impl RestorationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot for an identifier.
    pub fn set(&self, identifier: &str, snapshot: RestorationSnapshot) {
        self.snapshots
            .write()
            .insert(identifier.to_string(), snapshot);
    }

    /// Returns the snapshot for an identifier, if any.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<RestorationSnapshot> {
        self.snapshots.read().get(identifier).cloned()
    }

    /// Removes the snapshot for an identifier.
    pub fn remove(&self, identifier: &str) -> Option<RestorationSnapshot> {
        self.snapshots.write().remove(identifier)
    }
}
