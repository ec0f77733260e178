//! Backend registry for name-based backend lookup.
//!
//! Maps backend names to factories, tracks the process-wide default name, and
//! knows two kinds of names that are not registered up front:
//!
//! - *external* names, backed by an installer that tries to register the real
//!   backend and fails loudly if it cannot;
//! - *maybe-available* names, which this crate advertises but which may be
//!   missing on the current platform. Asking for one of those degrades to the
//!   default backend with a warning.

use crate::builtin;
use crate::descriptor::{ActiveBackend, BackendDescriptor, BackendParams};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use switchyard_core::{ConfigurationError, Result};

/// Name of the backend used to force thread-based execution
pub const DEFAULT_THREAD_BACKEND: &str = "threading";

/// Builds a backend descriptor from construction parameters
pub type BackendFactory = Arc<dyn Fn(BackendParams) -> Result<BackendDescriptor> + Send + Sync>;

/// Registers an optional backend on first demand
pub type Installer = Arc<dyn Fn(&mut BackendRegistry) -> Result<()> + Send + Sync>;

/// What the current platform can run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSupport {
    /// Worker processes can be spawned
    pub processes: bool,
}

impl RuntimeSupport {
    /// Probe the current target
    #[must_use]
    pub const fn detect() -> Self {
        Self {
            processes: cfg!(any(unix, windows)) && !cfg!(target_family = "wasm"),
        }
    }
}

impl Default for RuntimeSupport {
    fn default() -> Self {
        Self::detect()
    }
}

/// Registry of backend factories
///
/// Registration is expected at start-up or on first use of an optional name.
pub struct BackendRegistry {
    /// Factories by name, in registration order
    factories: IndexMap<String, BackendFactory>,
    /// Installers for names that are registered on demand
    external: IndexMap<String, Installer>,
    /// Names that silently degrade to the default when missing
    maybe_available: BTreeSet<String>,
    /// Backend used when no scope names one
    default_name: String,
}

impl BackendRegistry {
    /// Create a registry with the built-in backends for this platform
    #[must_use]
    pub fn new() -> Self {
        Self::with_support(RuntimeSupport::detect())
    }

    /// Create a registry with the built-in backends for the given support
    #[must_use]
    pub fn with_support(support: RuntimeSupport) -> Self {
        let mut registry = Self {
            factories: IndexMap::new(),
            external: IndexMap::new(),
            maybe_available: ["multiprocessing", "processes"]
                .into_iter()
                .map(String::from)
                .collect(),
            default_name: DEFAULT_THREAD_BACKEND.to_string(),
        };

        registry.register(DEFAULT_THREAD_BACKEND, builtin::threading_factory, false);
        registry.register("sequential", builtin::sequential_factory, false);
        if support.processes {
            registry.register("multiprocessing", builtin::multiprocessing_factory, false);
            registry.register("processes", builtin::process_pool_factory, true);
        }
        registry.register_external("distributed", builtin::install_distributed);

        registry
    }

    /// Register a factory, replacing any previous one under `name`
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F, make_default: bool)
    where
        F: Fn(BackendParams) -> Result<BackendDescriptor> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(backend = %name, make_default, "registering backend");
        if make_default {
            self.default_name = name.clone();
        }
        self.factories.insert(name, Arc::new(factory));
    }

    /// Register an installer for a name that is only available on demand
    pub fn register_external<F>(&mut self, name: impl Into<String>, installer: F)
    where
        F: Fn(&mut BackendRegistry) -> Result<()> + Send + Sync + 'static,
    {
        self.external.insert(name.into(), Arc::new(installer));
    }

    /// Look up the factory for `name`, installing or degrading as needed
    ///
    /// # Errors
    ///
    /// Returns error if the name is unknown, or if its installer fails
    pub fn resolve_name(&mut self, name: &str) -> Result<BackendFactory> {
        if let Some(factory) = self.factories.get(name) {
            return Ok(Arc::clone(factory));
        }

        if let Some(installer) = self.external.get(name).cloned() {
            tracing::debug!(backend = name, "running backend installer");
            installer(self)?;
            return self.factories.get(name).cloned().ok_or_else(|| {
                ConfigurationError::InstallerDidNotRegister {
                    name: name.to_string(),
                }
                .into()
            });
        }

        if self.maybe_available.contains(name) {
            let fallback = self.default_factory()?;
            tracing::warn!(
                backend = name,
                fallback = %self.default_name,
                "backend {:?} is not available on your system, falling back to {:?}",
                name,
                self.default_name
            );
            self.factories.insert(name.to_string(), Arc::clone(&fallback));
            return Ok(fallback);
        }

        Err(self.unknown(name))
    }

    /// Factory of the default backend
    ///
    /// # Errors
    ///
    /// Returns error if the default name was never registered
    pub fn default_factory(&self) -> Result<BackendFactory> {
        self.factories
            .get(&self.default_name)
            .cloned()
            .ok_or_else(|| self.unknown(&self.default_name))
    }

    /// Factory of the backend used to force thread-based execution
    ///
    /// # Errors
    ///
    /// Returns error if the thread backend was unregistered
    pub fn thread_factory(&self) -> Result<BackendFactory> {
        self.factories
            .get(DEFAULT_THREAD_BACKEND)
            .cloned()
            .ok_or_else(|| self.unknown(DEFAULT_THREAD_BACKEND))
    }

    /// Name of the default backend
    #[must_use]
    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Check if a name is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Check if a name has an installer
    #[must_use]
    pub fn is_external(&self, name: &str) -> bool {
        self.external.contains_key(name)
    }

    /// Registered names, in registration order
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Names that can be installed on demand
    #[must_use]
    pub fn list_external(&self) -> Vec<String> {
        self.external.keys().cloned().collect()
    }

    /// Remove a name
    ///
    /// # Errors
    ///
    /// Returns error if the name is not registered
    pub fn unregister(&mut self, name: &str) -> Result<()> {
        self.factories
            .shift_remove(name)
            .map(|_| ())
            .ok_or_else(|| self.unknown(name))
    }

    /// Number of registered names
    #[must_use]
    pub fn count(&self) -> usize {
        self.factories.len()
    }

    fn unknown(&self, name: &str) -> switchyard_core::SwitchyardError {
        let mut available = self.list();
        available.sort();
        ConfigurationError::UnknownBackend {
            name: name.to_string(),
            available,
        }
        .into()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .field("external", &self.external.keys().collect::<Vec<_>>())
            .field("maybe_available", &self.maybe_available)
            .field("default_name", &self.default_name)
            .finish()
    }
}

/// Thread-safe registry for concurrent access
///
/// Factories are called with the lock released, so they may consult the
/// registry themselves. Installers run under the write lock and receive the
/// registry directly. Concurrent registrations of the same name race; the
/// last one wins.
#[derive(Debug, Default)]
pub struct SharedRegistry {
    inner: RwLock<BackendRegistry>,
}

impl SharedRegistry {
    /// Create a new shared registry with the built-in backends
    #[must_use]
    pub fn new() -> Self {
        Self::from_registry(BackendRegistry::new())
    }

    /// Wrap an existing registry
    #[must_use]
    pub fn from_registry(registry: BackendRegistry) -> Self {
        Self {
            inner: RwLock::new(registry),
        }
    }

    /// Register a factory
    pub fn register<F>(&self, name: impl Into<String>, factory: F, make_default: bool)
    where
        F: Fn(BackendParams) -> Result<BackendDescriptor> + Send + Sync + 'static,
    {
        self.write().register(name, factory, make_default);
    }

    /// Register an installer
    pub fn register_external<F>(&self, name: impl Into<String>, installer: F)
    where
        F: Fn(&mut BackendRegistry) -> Result<()> + Send + Sync + 'static,
    {
        self.write().register_external(name, installer);
    }

    /// Look up the factory for `name`
    ///
    /// # Errors
    ///
    /// Returns error if the name is unknown, or if its installer fails
    pub fn resolve_name(&self, name: &str) -> Result<BackendFactory> {
        if let Some(factory) = self.read().factories.get(name) {
            return Ok(Arc::clone(factory));
        }
        self.write().resolve_name(name)
    }

    /// Build a descriptor for `name`
    ///
    /// # Errors
    ///
    /// Returns error if the name cannot be resolved or the factory fails
    pub fn create(&self, name: &str, params: BackendParams) -> Result<BackendDescriptor> {
        let factory = self.resolve_name(name)?;
        factory(params)
    }

    /// Build the default backend, pinned at `nesting_level`
    ///
    /// # Errors
    ///
    /// Returns error if the default factory is missing or fails
    pub fn create_default(&self, nesting_level: usize) -> Result<ActiveBackend> {
        let factory = self.read().default_factory()?;
        Ok(factory(BackendParams::new())?
            .with_nesting_level(nesting_level)
            .finalize(nesting_level))
    }

    /// Build the thread backend used for forced fallbacks
    ///
    /// # Errors
    ///
    /// Returns error if the thread factory is missing or fails
    pub fn create_thread_backend(&self, nesting_level: usize) -> Result<ActiveBackend> {
        let factory = self.read().thread_factory()?;
        Ok(factory(BackendParams::new())?
            .with_nesting_level(nesting_level)
            .finalize(nesting_level))
    }

    /// Name of the default backend
    #[must_use]
    pub fn default_name(&self) -> String {
        self.read().default_name().to_string()
    }

    /// Check if a name is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains(name)
    }

    /// Registered names, in registration order
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.read().list()
    }

    /// Names that can be installed on demand
    #[must_use]
    pub fn list_external(&self) -> Vec<String> {
        self.read().list_external()
    }

    fn read(&self) -> RwLockReadGuard<'_, BackendRegistry> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BackendRegistry> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

static GLOBAL: Lazy<SharedRegistry> = Lazy::new(SharedRegistry::new);

/// The process-wide registry
#[must_use]
pub fn global() -> &'static SharedRegistry {
    &GLOBAL
}

/// Register a backend factory in the process-wide registry
pub fn register_backend<F>(name: impl Into<String>, factory: F, make_default: bool)
where
    F: Fn(BackendParams) -> Result<BackendDescriptor> + Send + Sync + 'static,
{
    GLOBAL.register(name, factory, make_default);
}

/// Register an on-demand installer in the process-wide registry
pub fn register_external<F>(name: impl Into<String>, installer: F)
where
    F: Fn(&mut BackendRegistry) -> Result<()> + Send + Sync + 'static,
{
    GLOBAL.register_external(name, installer);
}
