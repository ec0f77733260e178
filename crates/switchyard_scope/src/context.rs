//! Per-thread active snapshot.
//!
//! Each thread owns one slot, initialized lazily to the shared root. Scopes
//! entered on one thread are invisible to every other thread. Worker threads
//! do not inherit their spawner's scope; pass [`current_snapshot`] along and
//! run the worker body under [`with_snapshot`] to carry it across.

use crate::snapshot::ConfigSnapshot;
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static ACTIVE: RefCell<Arc<ConfigSnapshot>> = RefCell::new(ConfigSnapshot::root());
}

/// The snapshot active on the calling thread
#[must_use]
pub fn current_snapshot() -> Arc<ConfigSnapshot> {
    ACTIVE.with(|active| Arc::clone(&active.borrow()))
}

/// Install `snapshot` as the active one, returning the one it replaces
pub(crate) fn replace_active(snapshot: Arc<ConfigSnapshot>) -> Arc<ConfigSnapshot> {
    ACTIVE.with(|active| active.replace(snapshot))
}

/// Reinstall a snapshot while the thread may be shutting down
pub(crate) fn restore_active(snapshot: Arc<ConfigSnapshot>) {
    // The slot is already gone during thread-local destruction.
    let _ = ACTIVE.try_with(|active| active.replace(snapshot));
}

/// Run `f` with `snapshot` active on this thread
///
/// The previous snapshot is restored when `f` returns or unwinds.
pub fn with_snapshot<R>(snapshot: Arc<ConfigSnapshot>, f: impl FnOnce() -> R) -> R {
    let _activation = Activation {
        previous: replace_active(snapshot),
    };
    f()
}

struct Activation {
    previous: Arc<ConfigSnapshot>,
}

impl Drop for Activation {
    fn drop(&mut self) {
        restore_active(Arc::clone(&self.previous));
    }
}
