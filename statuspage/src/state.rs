use crate::models::Snapshot;
use parking_lot::RwLock;
use std::sync::Arc;

/// The one "current snapshot" of the process.
///
/// Built once at startup and handed to the collector (single writer) and to
/// every reader (HTTP handlers, broadcaster). Publishing swaps an `Arc`, so the
/// write lock is only held for the pointer swap and readers never see a mix of
/// two ticks.
#[derive(Clone, Default)]
pub struct SnapshotCell {
    inner: Arc<RwLock<Arc<Snapshot>>>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.inner.read().clone()
    }

    pub fn publish(&self, snapshot: Snapshot) {
        let next = Arc::new(snapshot);
        *self.inner.write() = next;
    }
}
