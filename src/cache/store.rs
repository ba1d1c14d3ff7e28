//! Holder for the live snapshot.
//!
//! The lock only guards the pointer.  Readers clone the `Arc` and release the
//! lock immediately, so a reader keeps a consistent snapshot for the whole
//! request even if a rebuild swaps in a new one meanwhile.

use std::sync::{Arc, RwLock};

use crate::index::Snapshot;

#[derive(Debug)]
pub struct CacheStore {
    current: RwLock<Arc<Snapshot>>,
}

impl CacheStore {
    pub fn new(initial: Snapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// The last successfully built snapshot.
    pub fn get(&self) -> Arc<Snapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the live snapshot, returning the one it replaced.
    pub fn swap(&self, next: Snapshot) -> Arc<Snapshot> {
        let next = Arc::new(next);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, next)
    }
}
