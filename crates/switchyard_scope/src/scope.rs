//! Scope lifecycle.
//!
//! [`ParallelConfig`] collects the settings for one scope. Entering it
//! validates the backend choice, builds a snapshot whose parent is the
//! currently active one and installs it on the calling thread. The returned
//! [`ScopeGuard`] puts the parent back when it is dropped, including during
//! unwinding. Guards are `!Send`: a scope is exited on the thread that
//! entered it.

use crate::context::{current_snapshot, replace_active, restore_active};
use crate::keys::{BackendKey, NJobsKey};
use crate::snapshot::ConfigSnapshot;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use switchyard_backend::{ActiveBackend, BackendDescriptor, BackendParams, SharedRegistry, registry};
use switchyard_core::{ByteSize, MmapMode, Prefer, Require, Result, Setting, UsageError};

/// How a scope names its backend
#[derive(Debug, Clone)]
pub enum BackendChoice {
    /// Registered name, built through the registry
    Name(String),
    /// Descriptor whose nesting level may still be open
    Descriptor(BackendDescriptor),
    /// Backend built beforehand
    Instance(Arc<ActiveBackend>),
}

impl From<&str> for BackendChoice {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for BackendChoice {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<BackendDescriptor> for BackendChoice {
    fn from(descriptor: BackendDescriptor) -> Self {
        Self::Descriptor(descriptor)
    }
}

impl From<Arc<ActiveBackend>> for BackendChoice {
    fn from(backend: Arc<ActiveBackend>) -> Self {
        Self::Instance(backend)
    }
}

impl From<ActiveBackend> for BackendChoice {
    fn from(backend: ActiveBackend) -> Self {
        Self::Instance(Arc::new(backend))
    }
}

/// Settings for one configuration scope
///
/// Everything left untouched is inherited from the enclosing scope.
///
/// ```ignore
/// let _scope = ParallelConfig::new().backend("threading").n_jobs(4).enter()?;
/// ```
#[derive(Debug, Default)]
pub struct ParallelConfig {
    backend: Option<BackendChoice>,
    n_jobs: Setting<Option<i32>>,
    verbose: Setting<u32>,
    temp_folder: Setting<Option<PathBuf>>,
    max_nbytes: Setting<Option<ByteSize>>,
    mmap_mode: Setting<Option<MmapMode>>,
    prefer: Setting<Option<Prefer>>,
    require: Setting<Option<Require>>,
    inner_max_num_threads: Option<usize>,
    params: BackendParams,
}

impl ParallelConfig {
    /// Create a scope that sets nothing
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend
    #[must_use]
    pub fn backend(mut self, backend: impl Into<BackendChoice>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Set the worker count; `None` hands the choice back to the backend
    #[must_use]
    pub fn n_jobs(mut self, n_jobs: impl Into<Option<i32>>) -> Self {
        self.n_jobs = Setting::Explicit(n_jobs.into());
        self
    }

    /// Set the verbosity
    #[must_use]
    pub fn verbose(mut self, verbose: u32) -> Self {
        self.verbose = Setting::Explicit(verbose);
        self
    }

    /// Set the folder for memory-mapped arguments
    #[must_use]
    pub fn temp_folder(mut self, folder: impl AsRef<Path>) -> Self {
        self.temp_folder = Setting::Explicit(Some(folder.as_ref().to_path_buf()));
        self
    }

    /// Clear an enclosing scope's folder, letting the mapper choose again
    #[must_use]
    pub fn no_temp_folder(mut self) -> Self {
        self.temp_folder = Setting::Explicit(None);
        self
    }

    /// Set the memory-mapping threshold; `None` disables memory-mapping
    #[must_use]
    pub fn max_nbytes(mut self, max_nbytes: impl Into<Option<ByteSize>>) -> Self {
        self.max_nbytes = Setting::Explicit(max_nbytes.into());
        self
    }

    /// Set the memory-mapping mode
    #[must_use]
    pub fn mmap_mode(mut self, mode: impl Into<Option<MmapMode>>) -> Self {
        self.mmap_mode = Setting::Explicit(mode.into());
        self
    }

    /// Set the soft backend hint
    #[must_use]
    pub fn prefer(mut self, prefer: impl Into<Option<Prefer>>) -> Self {
        self.prefer = Setting::Explicit(prefer.into());
        self
    }

    /// Set the hard backend constraint
    #[must_use]
    pub fn require(mut self, require: impl Into<Option<Require>>) -> Self {
        self.require = Setting::Explicit(require.into());
        self
    }

    /// Cap the thread pools inside each worker of the backend
    #[must_use]
    pub fn inner_max_num_threads(mut self, threads: usize) -> Self {
        self.inner_max_num_threads = Some(threads);
        self
    }

    /// Add one backend construction parameter
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Add several backend construction parameters
    #[must_use]
    pub fn params(mut self, params: BackendParams) -> Self {
        self.params.extend(params);
        self
    }

    /// Enter the scope, resolving backend names in the process-wide registry
    ///
    /// # Errors
    ///
    /// Returns error if the backend choice is invalid; nothing is installed
    /// in that case
    pub fn enter(self) -> Result<ScopeGuard> {
        self.enter_in(registry::global())
    }

    /// Enter the scope, resolving backend names in `registry`
    ///
    /// # Errors
    ///
    /// Returns error if the backend choice is invalid; nothing is installed
    /// in that case
    pub fn enter_in(self, registry: &SharedRegistry) -> Result<ScopeGuard> {
        let parent = current_snapshot();
        let backend = self.check_backend(registry, &parent)?;

        let snapshot = Arc::new(ConfigSnapshot {
            backend: backend.map_or(Setting::Unset, Setting::Explicit),
            n_jobs: self.n_jobs,
            verbose: self.verbose,
            temp_folder: self.temp_folder,
            max_nbytes: self.max_nbytes,
            mmap_mode: self.mmap_mode,
            prefer: self.prefer,
            require: self.require,
            parent: Some(Arc::clone(&parent)),
        });

        let previous = replace_active(Arc::clone(&snapshot));
        tracing::debug!(
            depth = snapshot.depth(),
            backend = snapshot.backend.as_explicit().map(|b| b.name()),
            "entered parallel config scope"
        );

        Ok(ScopeGuard {
            snapshot,
            previous,
            _not_send: PhantomData,
        })
    }

    /// Run `f` inside the scope
    ///
    /// # Errors
    ///
    /// Returns error if the scope cannot be entered; `f` is not run then
    pub fn scope<R>(self, f: impl FnOnce() -> R) -> Result<R> {
        self.scope_in(registry::global(), f)
    }

    /// Run `f` inside the scope, resolving names in `registry`
    ///
    /// # Errors
    ///
    /// Returns error if the scope cannot be entered; `f` is not run then
    pub fn scope_in<R>(self, registry: &SharedRegistry, f: impl FnOnce() -> R) -> Result<R> {
        let _guard = self.enter_in(registry)?;
        Ok(f())
    }

    fn check_backend(
        &self,
        registry: &SharedRegistry,
        parent: &ConfigSnapshot,
    ) -> Result<Option<Arc<ActiveBackend>>> {
        let Some(choice) = &self.backend else {
            if !self.params.is_empty() || self.inner_max_num_threads.is_some() {
                return Err(UsageError::BackendParamsWithoutBackend.into());
            }
            return Ok(None);
        };

        let inherited = parent
            .get::<BackendKey>()
            .map_or(0, |backend| backend.nesting_level());

        let backend = match choice {
            BackendChoice::Name(name) => {
                let descriptor = registry.create(name, self.params.clone())?;
                self.cap_inner_threads(descriptor)?.finalize(inherited)
            }
            BackendChoice::Descriptor(descriptor) => {
                self.warn_ignored_params(descriptor.kind().name());
                self.cap_inner_threads(descriptor.clone())?.finalize(inherited)
            }
            BackendChoice::Instance(backend) => {
                self.warn_ignored_params(backend.name());
                match self.inner_max_num_threads {
                    Some(threads) => backend.with_inner_max_num_threads(threads)?,
                    None => return Ok(Some(Arc::clone(backend))),
                }
            }
        };
        Ok(Some(Arc::new(backend)))
    }

    fn cap_inner_threads(&self, descriptor: BackendDescriptor) -> Result<BackendDescriptor> {
        match self.inner_max_num_threads {
            Some(threads) => Ok(descriptor.with_inner_max_num_threads(threads)?),
            None => Ok(descriptor),
        }
    }

    fn warn_ignored_params(&self, backend: &str) {
        if !self.params.is_empty() {
            tracing::warn!(
                backend,
                params = ?self.params.keys().collect::<Vec<_>>(),
                "backend parameters ignored for an already constructed backend"
            );
        }
    }
}

/// An entered scope; dropping it restores the enclosing one
#[must_use = "the scope exits as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ScopeGuard {
    snapshot: Arc<ConfigSnapshot>,
    previous: Arc<ConfigSnapshot>,
    _not_send: PhantomData<Rc<()>>,
}

impl ScopeGuard {
    /// Snapshot installed by this scope
    #[must_use]
    pub fn config(&self) -> &Arc<ConfigSnapshot> {
        &self.snapshot
    }

    /// Backend in effect inside this scope, if any scope set one
    #[must_use]
    pub fn backend(&self) -> Option<Arc<ActiveBackend>> {
        self.snapshot.get::<BackendKey>()
    }

    /// Exit the scope now
    pub fn exit(self) {}
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        restore_active(Arc::clone(&self.previous));
        tracing::debug!(depth = self.snapshot.depth(), "exited parallel config scope");
    }
}

/// A scope that must name a backend
///
/// Unlike [`ParallelConfig`], `n_jobs` defaults to `-1` (all CPUs).
#[derive(Debug)]
pub struct BackendScope {
    config: ParallelConfig,
}

impl BackendScope {
    /// Create a scope for `backend`
    #[must_use]
    pub fn new(backend: impl Into<BackendChoice>) -> Self {
        Self {
            config: ParallelConfig::new().backend(backend).n_jobs(-1),
        }
    }

    /// Set the worker count
    #[must_use]
    pub fn n_jobs(mut self, n_jobs: impl Into<Option<i32>>) -> Self {
        self.config = self.config.n_jobs(n_jobs);
        self
    }

    /// Cap the thread pools inside each worker of the backend
    #[must_use]
    pub fn inner_max_num_threads(mut self, threads: usize) -> Self {
        self.config = self.config.inner_max_num_threads(threads);
        self
    }

    /// Add one backend construction parameter
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config = self.config.param(key, value);
        self
    }

    /// Enter the scope
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be built
    pub fn enter(self) -> Result<BackendGuard> {
        self.enter_in(registry::global())
    }

    /// Enter the scope, resolving names in `registry`
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be built
    pub fn enter_in(self, registry: &SharedRegistry) -> Result<BackendGuard> {
        let guard = self.config.enter_in(registry)?;
        let config = guard.config();
        let backend = config
            .own::<BackendKey>()
            .into_option()
            .flatten()
            .ok_or(UsageError::BackendParamsWithoutBackend)?;
        let n_jobs = config.get::<NJobsKey>();
        Ok(BackendGuard {
            guard,
            backend,
            n_jobs,
        })
    }
}

/// An entered [`BackendScope`]
#[must_use = "the scope exits as soon as the guard is dropped"]
#[derive(Debug)]
pub struct BackendGuard {
    guard: ScopeGuard,
    backend: Arc<ActiveBackend>,
    n_jobs: Option<i32>,
}

impl BackendGuard {
    /// Backend installed by this scope
    #[must_use]
    pub fn backend(&self) -> &Arc<ActiveBackend> {
        &self.backend
    }

    /// Worker count set by this scope
    #[must_use]
    pub const fn n_jobs(&self) -> Option<i32> {
        self.n_jobs
    }

    /// The `(backend, n_jobs)` pair
    #[must_use]
    pub fn pair(&self) -> (Arc<ActiveBackend>, Option<i32>) {
        (Arc::clone(&self.backend), self.n_jobs)
    }

    /// Underlying scope guard
    #[must_use]
    pub fn scope(&self) -> &ScopeGuard {
        &self.guard
    }

    /// Exit the scope now
    pub fn exit(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{TempFolderKey, VerboseKey};
    use crate::resolve::{get_active_backend_in, resolve_active_backend_in};
    use switchyard_backend::{BackendRegistry, ProcessPoolKind, RuntimeSupport, ThreadingKind};
    use switchyard_core::{ConfigurationError, SwitchyardError};

    fn registry() -> SharedRegistry {
        SharedRegistry::from_registry(BackendRegistry::with_support(RuntimeSupport {
            processes: true,
        }))
    }

    fn active(registry: &SharedRegistry) -> (Arc<ActiveBackend>, Option<i32>) {
        get_active_backend_in(registry, Setting::Unset, Setting::Unset, Setting::Unset).unwrap()
    }

    #[test]
    fn test_threading_scope_reverts() {
        let registry = registry();
        let before = current_snapshot();
        {
            let _scope = ParallelConfig::new()
                .backend("threading")
                .n_jobs(4)
                .enter_in(&registry)
                .unwrap();
            let (backend, n_jobs) = active(&registry);
            assert_eq!(backend.name(), "threading");
            assert_eq!(n_jobs, Some(4));
        }
        let (backend, n_jobs) = active(&registry);
        assert_eq!(backend.name(), "processes");
        assert_eq!(n_jobs, None);
        assert!(Arc::ptr_eq(&before, &current_snapshot()));
    }

    #[test]
    fn test_nested_sharedmem_scope() {
        let registry = registry();
        let _outer = ParallelConfig::new()
            .backend("processes")
            .temp_folder("/scratch")
            .verbose(5)
            .enter_in(&registry)
            .unwrap();
        let _inner = ParallelConfig::new()
            .require(Require::SharedMem)
            .enter_in(&registry)
            .unwrap();

        let (backend, config) =
            resolve_active_backend_in(&registry, Setting::Unset, Setting::Unset, Setting::Unset)
                .unwrap();
        assert_eq!(backend.name(), "threading");
        assert_eq!(config.get::<NJobsKey>(), Some(1));
        assert_eq!(config.get::<TempFolderKey>(), Some(PathBuf::from("/scratch")));
        assert_eq!(config.get::<VerboseKey>(), 5);
    }

    #[test]
    fn test_no_temp_folder_shadows_outer_folder() {
        let registry = registry();
        let _outer = ParallelConfig::new()
            .temp_folder("/scratch")
            .enter_in(&registry)
            .unwrap();
        {
            let inner = ParallelConfig::new().no_temp_folder().enter_in(&registry).unwrap();
            assert!(inner.config().own::<TempFolderKey>().is_explicit());
            assert_eq!(current_snapshot().get::<TempFolderKey>(), None);
        }
        assert_eq!(
            current_snapshot().get::<TempFolderKey>(),
            Some(PathBuf::from("/scratch"))
        );
    }

    #[test]
    fn test_exit_restores_parent() {
        let registry = registry();
        let outer = ParallelConfig::new().verbose(1).enter_in(&registry).unwrap();
        let inner = ParallelConfig::new().verbose(2).enter_in(&registry).unwrap();
        assert_eq!(current_snapshot().get::<VerboseKey>(), 2);
        inner.exit();
        assert!(Arc::ptr_eq(outer.config(), &current_snapshot()));
        outer.exit();
        assert!(ConfigSnapshot::is_root(&current_snapshot()));
    }

    #[test]
    fn test_params_without_backend_rejected() {
        let registry = registry();
        let before = current_snapshot();

        let err = ParallelConfig::new()
            .param("idle_worker_timeout", 10)
            .enter_in(&registry)
            .unwrap_err();
        assert_eq!(
            err,
            SwitchyardError::Usage(UsageError::BackendParamsWithoutBackend)
        );

        let err = ParallelConfig::new()
            .inner_max_num_threads(2)
            .enter_in(&registry)
            .unwrap_err();
        assert!(err.is_usage());
        assert!(Arc::ptr_eq(&before, &current_snapshot()));
    }

    #[test]
    fn test_unknown_backend_installs_nothing() {
        let registry = registry();
        let before = current_snapshot();
        let err = ParallelConfig::new()
            .backend("quantum")
            .n_jobs(2)
            .enter_in(&registry)
            .unwrap_err();
        assert!(matches!(
            err,
            SwitchyardError::Configuration(ConfigurationError::UnknownBackend { .. })
        ));
        assert!(Arc::ptr_eq(&before, &current_snapshot()));
    }

    #[test]
    fn test_inner_threads_support() {
        let registry = registry();
        let err = ParallelConfig::new()
            .backend("threading")
            .inner_max_num_threads(2)
            .enter_in(&registry)
            .unwrap_err();
        assert!(matches!(
            err,
            SwitchyardError::Usage(UsageError::InnerThreadsUnsupported { .. })
        ));

        let scope = ParallelConfig::new()
            .backend("processes")
            .inner_max_num_threads(2)
            .enter_in(&registry)
            .unwrap();
        assert_eq!(scope.backend().unwrap().inner_max_num_threads(), Some(2));
    }

    #[test]
    fn test_inner_threads_on_instance_copies() {
        let registry = registry();
        let original = Arc::new(BackendDescriptor::of(ProcessPoolKind).finalize(0));
        let scope = ParallelConfig::new()
            .backend(Arc::clone(&original))
            .inner_max_num_threads(3)
            .enter_in(&registry)
            .unwrap();
        assert_eq!(scope.backend().unwrap().inner_max_num_threads(), Some(3));
        assert_eq!(original.inner_max_num_threads(), None);
    }

    #[test]
    fn test_instance_is_installed_as_is() {
        let registry = registry();
        let instance = Arc::new(BackendDescriptor::of(ThreadingKind).finalize(4));
        let scope = ParallelConfig::new()
            .backend(Arc::clone(&instance))
            .enter_in(&registry)
            .unwrap();
        assert!(Arc::ptr_eq(&scope.backend().unwrap(), &instance));
    }

    #[test]
    fn test_nesting_level_inherited_unchanged() {
        let registry = registry();
        let _outer = ParallelConfig::new()
            .backend(BackendDescriptor::of(ProcessPoolKind).with_nesting_level(2))
            .enter_in(&registry)
            .unwrap();
        let inner = ParallelConfig::new()
            .backend("threading")
            .enter_in(&registry)
            .unwrap();
        assert_eq!(inner.backend().unwrap().nesting_level(), 2);
    }

    #[test]
    fn test_top_level_named_backend_at_level_zero() {
        let registry = registry();
        let scope = ParallelConfig::new()
            .backend(BackendDescriptor::of(ThreadingKind))
            .enter_in(&registry)
            .unwrap();
        assert_eq!(scope.backend().unwrap().nesting_level(), 0);
    }

    #[test]
    fn test_closure_scope() {
        let registry = registry();
        let seen = ParallelConfig::new()
            .backend("sequential")
            .scope_in(&registry, || active(&registry).0.name().to_string())
            .unwrap();
        assert_eq!(seen, "sequential");
        assert_eq!(active(&registry).0.name(), "processes");
    }

    #[test]
    fn test_scope_restores_on_unwind() {
        let before = current_snapshot();
        let result = std::panic::catch_unwind(|| {
            let registry = registry();
            let _scope = ParallelConfig::new()
                .backend("threading")
                .enter_in(&registry)
                .unwrap();
            panic!("parallel call failed");
        });
        assert!(result.is_err());
        assert!(Arc::ptr_eq(&before, &current_snapshot()));
    }

    #[test]
    fn test_scopes_isolated_between_threads() {
        let registry = Arc::new(registry());
        let _scope = ParallelConfig::new()
            .backend("threading")
            .n_jobs(3)
            .enter_in(&registry)
            .unwrap();

        let worker_registry = Arc::clone(&registry);
        let (name, n_jobs) = std::thread::spawn(move || {
            let (backend, n_jobs) = active(&worker_registry);
            (backend.name().to_string(), n_jobs)
        })
        .join()
        .unwrap();
        assert_eq!(name, "processes");
        assert_eq!(n_jobs, None);
        assert_eq!(active(&registry).0.name(), "threading");
    }

    #[test]
    fn test_backend_scope_defaults_to_all_cpus() {
        let registry = registry();
        let scope = BackendScope::new("threading").enter_in(&registry).unwrap();
        let (backend, n_jobs) = scope.pair();
        assert_eq!(backend.name(), "threading");
        assert_eq!(n_jobs, Some(-1));
        assert_eq!(active(&registry).1, Some(-1));
        scope.exit();
        assert_eq!(active(&registry).1, None);
    }

    #[test]
    fn test_backend_scope_with_params() {
        let registry = registry();
        let scope = BackendScope::new("processes")
            .n_jobs(2)
            .param("idle_worker_timeout", 30)
            .enter_in(&registry)
            .unwrap();
        assert_eq!(scope.n_jobs(), Some(2));
        assert_eq!(scope.backend().params()["idle_worker_timeout"], 30);
    }

    proptest::proptest! {
        #[test]
        fn prop_nested_scopes_unwind_to_root(levels in proptest::collection::vec(0i32..16, 1..8)) {
            let registry = registry();
            let root = current_snapshot();
            let mut guards = Vec::new();
            for n in &levels {
                guards.push(ParallelConfig::new().n_jobs(*n).enter_in(&registry).unwrap());
                proptest::prop_assert_eq!(current_snapshot().get::<NJobsKey>(), Some(*n));
            }
            proptest::prop_assert_eq!(current_snapshot().depth(), levels.len());
            while let Some(guard) = guards.pop() {
                let parent = Arc::clone(guard.config().parent().unwrap());
                drop(guard);
                proptest::prop_assert!(Arc::ptr_eq(&parent, &current_snapshot()));
            }
            proptest::prop_assert!(Arc::ptr_eq(&root, &current_snapshot()));
        }
    }
}
