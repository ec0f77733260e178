//! Configuration snapshots and the chain walk.
//!
//! A snapshot records what one scope set explicitly and points at the scope
//! it was entered from. Snapshots never change after construction; the root
//! snapshot (nothing set, no parent) is one shared value for the whole
//! process.

use crate::keys::{
    BackendKey, ConfigKey, MaxNbytesKey, MmapModeKey, NJobsKey, PreferKey, RequireKey,
    TempFolderKey, VerboseKey,
};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use switchyard_backend::ActiveBackend;
use switchyard_core::{ByteSize, MmapMode, Prefer, Require, Setting};

static ROOT: Lazy<Arc<ConfigSnapshot>> = Lazy::new(|| Arc::new(ConfigSnapshot::default()));

/// One scope's explicit settings plus a link to the enclosing scope
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    pub(crate) backend: Setting<Arc<ActiveBackend>>,
    pub(crate) n_jobs: Setting<Option<i32>>,
    pub(crate) verbose: Setting<u32>,
    pub(crate) temp_folder: Setting<Option<PathBuf>>,
    pub(crate) max_nbytes: Setting<Option<ByteSize>>,
    pub(crate) mmap_mode: Setting<Option<MmapMode>>,
    pub(crate) prefer: Setting<Option<Prefer>>,
    pub(crate) require: Setting<Option<Require>>,
    pub(crate) parent: Option<Arc<ConfigSnapshot>>,
}

impl ConfigSnapshot {
    /// The shared root snapshot
    #[must_use]
    pub fn root() -> Arc<Self> {
        Arc::clone(&ROOT)
    }

    /// Snapshot produced when a hard constraint forces a thread backend
    ///
    /// Only `backend` and `n_jobs` are set; every other key is inherited from
    /// `parent`.
    #[must_use]
    pub fn forced(backend: Arc<ActiveBackend>, parent: Arc<Self>) -> Self {
        Self {
            backend: Setting::Explicit(backend),
            n_jobs: Setting::Explicit(Some(1)),
            parent: Some(parent),
            ..Self::default()
        }
    }

    /// Check if this is the shared root
    #[must_use]
    pub fn is_root(this: &Arc<Self>) -> bool {
        Arc::ptr_eq(this, &ROOT)
    }

    /// Enclosing snapshot
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<Self>> {
        self.parent.as_ref()
    }

    /// Number of parent links between this snapshot and the outermost one
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent.as_deref();
        while let Some(snapshot) = current {
            depth += 1;
            current = snapshot.parent.as_deref();
        }
        depth
    }

    /// What this snapshot itself says about `K`
    #[must_use]
    pub fn own<K: ConfigKey>(&self) -> Setting<K::Value> {
        K::lookup(self)
    }

    /// Resolved value of `K` as seen from this snapshot
    #[must_use]
    pub fn get<K: ConfigKey>(&self) -> K::Value {
        get_config_param::<K>(Setting::Unset, self)
    }

    /// Resolved values of every key
    #[must_use]
    pub fn view(&self) -> SnapshotView {
        let backend = self.get::<BackendKey>();
        SnapshotView {
            backend: backend.as_ref().map(|b| b.name().to_string()),
            nesting_level: backend.as_ref().map(|b| b.nesting_level()),
            n_jobs: self.get::<NJobsKey>(),
            verbose: self.get::<VerboseKey>(),
            temp_folder: self.get::<TempFolderKey>(),
            max_nbytes: self.get::<MaxNbytesKey>(),
            mmap_mode: self.get::<MmapModeKey>(),
            prefer: self.get::<PreferKey>(),
            require: self.get::<RequireKey>(),
            depth: self.depth(),
        }
    }
}

/// Resolve a parameter against a scope chain
///
/// An explicit `param` wins. Otherwise the chain is walked from `scope`
/// outward and the first explicit setting is returned; if no scope sets the
/// key, its built-in default is returned.
pub fn get_config_param<K: ConfigKey>(
    param: Setting<K::Value>,
    scope: &ConfigSnapshot,
) -> K::Value {
    if let Setting::Explicit(value) = param {
        return value;
    }

    let mut depth = 0usize;
    let mut current = Some(scope);
    while let Some(snapshot) = current {
        if let Setting::Explicit(value) = K::lookup(snapshot) {
            tracing::trace!(key = K::NAME, depth, "resolved from scope");
            return value;
        }
        depth += 1;
        current = snapshot.parent.as_deref();
    }

    K::default_value()
}

/// Serializable view of a snapshot's resolved values
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotView {
    /// Backend name, `None` for the registry default
    pub backend: Option<String>,
    /// Backend nesting level, when a backend is set
    pub nesting_level: Option<usize>,
    /// Requested worker count
    pub n_jobs: Option<i32>,
    /// Verbosity
    pub verbose: u32,
    /// Folder for memory-mapped arguments
    pub temp_folder: Option<PathBuf>,
    /// Memory-mapping threshold
    pub max_nbytes: Option<ByteSize>,
    /// Memory-mapping mode
    pub mmap_mode: Option<MmapMode>,
    /// Soft hint
    pub prefer: Option<Prefer>,
    /// Hard constraint
    pub require: Option<Require>,
    /// Number of enclosing scopes
    pub depth: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_backend::{BackendDescriptor, ThreadingKind};

    fn child(
        parent: &Arc<ConfigSnapshot>,
        edit: impl FnOnce(&mut ConfigSnapshot),
    ) -> Arc<ConfigSnapshot> {
        let mut snapshot = ConfigSnapshot {
            parent: Some(Arc::clone(parent)),
            ..ConfigSnapshot::default()
        };
        edit(&mut snapshot);
        Arc::new(snapshot)
    }

    #[test]
    fn test_root_defaults() {
        let root = ConfigSnapshot::root();
        assert!(ConfigSnapshot::is_root(&root));
        assert_eq!(root.depth(), 0);
        assert!(root.get::<BackendKey>().is_none());
        assert_eq!(root.get::<NJobsKey>(), None);
        assert_eq!(root.get::<VerboseKey>(), 0);
        assert_eq!(root.get::<MaxNbytesKey>(), Some(ByteSize::from_bytes(1024 * 1024)));
        assert_eq!(root.get::<MmapModeKey>(), Some(MmapMode::ReadOnly));
    }

    #[test]
    fn test_explicit_param_beats_chain() {
        let root = ConfigSnapshot::root();
        let scope = child(&root, |s| s.n_jobs = Setting::Explicit(Some(4)));
        assert_eq!(get_config_param::<NJobsKey>(Setting::Explicit(Some(2)), &scope), Some(2));
        assert_eq!(get_config_param::<NJobsKey>(Setting::Unset, &scope), Some(4));
    }

    #[test]
    fn test_innermost_explicit_wins() {
        let root = ConfigSnapshot::root();
        let outer = child(&root, |s| s.verbose = Setting::Explicit(5));
        let middle = child(&outer, |_| {});
        let inner = child(&middle, |s| s.verbose = Setting::Explicit(10));
        assert_eq!(inner.get::<VerboseKey>(), 10);
        assert_eq!(middle.get::<VerboseKey>(), 5);
        assert_eq!(inner.depth(), 3);
    }

    #[test]
    fn test_explicit_none_shadows_outer_value() {
        let root = ConfigSnapshot::root();
        let outer = child(&root, |s| s.prefer = Setting::Explicit(Some(Prefer::Threads)));
        let inner = child(&outer, |s| s.prefer = Setting::Explicit(None));
        assert_eq!(inner.get::<PreferKey>(), None);
        assert_eq!(outer.get::<PreferKey>(), Some(Prefer::Threads));
    }

    #[test]
    fn test_explicit_default_equals_unset() {
        // setting verbose=0 and not setting it are observationally the same
        let root = ConfigSnapshot::root();
        let explicit = child(&root, |s| s.verbose = Setting::Explicit(0));
        assert_eq!(explicit.get::<VerboseKey>(), root.get::<VerboseKey>());
        assert!(explicit.own::<VerboseKey>().is_explicit());
        assert!(root.own::<VerboseKey>().is_unset());
    }

    #[test]
    fn test_forced_snapshot_inherits_other_keys() {
        let root = ConfigSnapshot::root();
        let outer = child(&root, |s| {
            s.temp_folder = Setting::Explicit(Some(PathBuf::from("/scratch")));
            s.n_jobs = Setting::Explicit(Some(8));
        });
        let backend = Arc::new(BackendDescriptor::of(ThreadingKind).finalize(0));
        let forced = ConfigSnapshot::forced(backend, Arc::clone(&outer));
        assert_eq!(forced.get::<NJobsKey>(), Some(1));
        assert_eq!(forced.get::<TempFolderKey>(), Some(PathBuf::from("/scratch")));
        assert_eq!(
            forced.get::<BackendKey>().map(|b| b.name().to_string()),
            Some("threading".to_string())
        );
    }

    #[test]
    fn test_view() {
        let root = ConfigSnapshot::root();
        let scope = child(&root, |s| {
            let backend = BackendDescriptor::of(ThreadingKind).finalize(2);
            s.backend = Setting::Explicit(Arc::new(backend));
            s.require = Setting::Explicit(Some(Require::SharedMem));
        });
        let view = scope.view();
        assert_eq!(view.backend.as_deref(), Some("threading"));
        assert_eq!(view.nesting_level, Some(2));
        assert_eq!(view.require, Some(Require::SharedMem));
        assert_eq!(view.depth, 1);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["require"], "sharedmem");
        assert_eq!(json["max_nbytes"], "1M");
    }

    proptest::proptest! {
        #[test]
        fn prop_chain_precedence(depth in 1usize..8, set_at in 0usize..8, value in 1i32..64) {
            let set_at = set_at % depth;
            let mut current = ConfigSnapshot::root();
            for level in 0..depth {
                current = child(&current, |s| {
                    if level == set_at {
                        s.n_jobs = Setting::Explicit(Some(value));
                    }
                });
            }
            proptest::prop_assert_eq!(current.get::<NJobsKey>(), Some(value));
            proptest::prop_assert_eq!(current.depth(), depth);
        }

        #[test]
        fn prop_innermost_of_two_wins(outer in 0u32..100, inner in 0u32..100, gap in 0usize..4) {
            let root = ConfigSnapshot::root();
            let mut current = child(&root, |s| s.verbose = Setting::Explicit(outer));
            for _ in 0..gap {
                current = child(&current, |_| {});
            }
            let innermost = child(&current, |s| s.verbose = Setting::Explicit(inner));
            proptest::prop_assert_eq!(innermost.get::<VerboseKey>(), inner);
            proptest::prop_assert_eq!(current.get::<VerboseKey>(), outer);
        }
    }
}
