//! A monotonic refresh marker shared between cache instances.
//!
//! Marking a signal tells every cache snapshotting it that the underlying
//! source may have changed wholesale. Each cache compares its last-seen
//! snapshot on access and re-validates its discovered source bounds when the
//! marker advanced, clearing all cached state if the bounds moved.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

static GLOBAL: Lazy<RefreshSignal> = Lazy::new(RefreshSignal::new);

/// A cloneable handle to a monotonic refresh counter.
#[derive(Clone, Debug)]
pub struct RefreshSignal(Arc<AtomicU64>);

impl RefreshSignal {
    /// A fresh signal observed only by caches it is explicitly handed to.
    pub fn new() -> Self {
        RefreshSignal(Arc::new(AtomicU64::new(1)))
    }

    /// The process-wide signal; the default for caches built without one.
    pub fn global() -> Self {
        GLOBAL.clone()
    }

    /// Advance the marker, invalidating every cache snapshot taken before.
    pub fn mark(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for RefreshSignal {
    fn default() -> Self {
        Self::new()
    }
}
