//! Backend descriptors and finalized instances.
//!
//! Construction happens in two phases. A factory returns a
//! [`BackendDescriptor`] whose nesting level may still be open; the scope
//! that installs it calls [`BackendDescriptor::finalize`] with the level
//! inherited from its parent. The resulting [`ActiveBackend`] never changes
//! afterwards and is shared through `Arc`.

use crate::kind::{BackendCapabilities, BackendKind, NestedPolicy};
use indexmap::IndexMap;
use std::sync::Arc;
use switchyard_core::UsageError;

/// Free-form backend construction parameters, in caller order
pub type BackendParams = IndexMap<String, serde_json::Value>;

/// A backend that has not been installed yet
#[derive(Debug, Clone)]
pub struct BackendDescriptor {
    kind: Arc<dyn BackendKind>,
    nesting_level: Option<usize>,
    inner_max_num_threads: Option<usize>,
    params: BackendParams,
}

impl BackendDescriptor {
    /// Create a descriptor for a kind with no parameters
    #[must_use]
    pub fn new(kind: Arc<dyn BackendKind>) -> Self {
        Self {
            kind,
            nesting_level: None,
            inner_max_num_threads: None,
            params: BackendParams::new(),
        }
    }

    /// Create a descriptor from a concrete kind value
    #[must_use]
    pub fn of<K: BackendKind + 'static>(kind: K) -> Self {
        Self::new(Arc::new(kind))
    }

    /// Set construction parameters
    #[must_use]
    pub fn with_params(mut self, params: BackendParams) -> Self {
        self.params = params;
        self
    }

    /// Pin the nesting level instead of inheriting it
    #[must_use]
    pub fn with_nesting_level(mut self, level: usize) -> Self {
        self.nesting_level = Some(level);
        self
    }

    /// Cap the thread pools used inside each worker
    ///
    /// # Errors
    ///
    /// Returns error if the kind does not support the knob
    pub fn with_inner_max_num_threads(mut self, threads: usize) -> Result<Self, UsageError> {
        check_inner_threads(self.kind.as_ref())?;
        self.inner_max_num_threads = Some(threads);
        Ok(self)
    }

    /// Kind of this backend
    #[must_use]
    pub fn kind(&self) -> &Arc<dyn BackendKind> {
        &self.kind
    }

    /// Pinned nesting level, if any
    #[must_use]
    pub const fn nesting_level(&self) -> Option<usize> {
        self.nesting_level
    }

    /// Construction parameters
    #[must_use]
    pub fn params(&self) -> &BackendParams {
        &self.params
    }

    /// Fix the nesting level and produce the installed instance
    ///
    /// A level pinned with [`with_nesting_level`](Self::with_nesting_level)
    /// wins over `inherited`.
    #[must_use]
    pub fn finalize(self, inherited: usize) -> ActiveBackend {
        ActiveBackend {
            nesting_level: self.nesting_level.unwrap_or(inherited),
            kind: self.kind,
            inner_max_num_threads: self.inner_max_num_threads,
            params: self.params,
        }
    }
}

/// An installed backend; immutable once built
#[derive(Debug, Clone)]
pub struct ActiveBackend {
    kind: Arc<dyn BackendKind>,
    nesting_level: usize,
    inner_max_num_threads: Option<usize>,
    params: BackendParams,
}

impl ActiveBackend {
    /// Kind name
    #[must_use]
    pub fn name(&self) -> &str {
        self.kind.name()
    }

    /// Kind of this backend
    #[must_use]
    pub fn kind(&self) -> &Arc<dyn BackendKind> {
        &self.kind
    }

    /// How deep into already-parallel code this backend runs
    #[must_use]
    pub const fn nesting_level(&self) -> usize {
        self.nesting_level
    }

    /// Capability flags of the kind
    #[must_use]
    pub fn capabilities(&self) -> BackendCapabilities {
        self.kind.capabilities()
    }

    /// Workers are threads
    #[must_use]
    pub fn uses_threads(&self) -> bool {
        self.capabilities().uses_threads
    }

    /// Workers share memory with the caller
    #[must_use]
    pub fn supports_sharedmem(&self) -> bool {
        self.capabilities().supports_sharedmem
    }

    /// Workers accept an inner thread cap
    #[must_use]
    pub fn supports_inner_max_num_threads(&self) -> bool {
        self.capabilities().supports_inner_max_num_threads
    }

    /// Inner thread cap, if set
    #[must_use]
    pub const fn inner_max_num_threads(&self) -> Option<usize> {
        self.inner_max_num_threads
    }

    /// Nested work policy of the kind
    #[must_use]
    pub fn nested_policy(&self) -> NestedPolicy {
        self.kind.nested_policy()
    }

    /// Construction parameters
    #[must_use]
    pub fn params(&self) -> &BackendParams {
        &self.params
    }

    /// Number of workers this backend would run for `n_jobs`
    ///
    /// # Errors
    ///
    /// Returns `UsageError::ZeroJobs` for `Some(0)`
    pub fn effective_n_jobs(&self, n_jobs: Option<i32>) -> Result<usize, UsageError> {
        self.kind.effective_n_jobs(n_jobs, self.nesting_level)
    }

    /// Copy of this backend with an inner thread cap
    ///
    /// Used when a scope adds the cap to an instance the caller built
    /// beforehand; the original is left untouched.
    ///
    /// # Errors
    ///
    /// Returns error if the kind does not support the knob
    pub fn with_inner_max_num_threads(&self, threads: usize) -> Result<Self, UsageError> {
        check_inner_threads(self.kind.as_ref())?;
        let mut copy = self.clone();
        copy.inner_max_num_threads = Some(threads);
        Ok(copy)
    }
}

fn check_inner_threads(kind: &dyn BackendKind) -> Result<(), UsageError> {
    if kind.capabilities().supports_inner_max_num_threads {
        Ok(())
    } else {
        Err(UsageError::InnerThreadsUnsupported {
            backend: kind.name().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{ProcessPoolKind, ThreadingKind};

    #[test]
    fn test_finalize_inherits_level() {
        let backend = BackendDescriptor::of(ThreadingKind).finalize(3);
        assert_eq!(backend.nesting_level(), 3);
        assert_eq!(backend.name(), "threading");
    }

    #[test]
    fn test_pinned_level_wins() {
        let backend = BackendDescriptor::of(ThreadingKind)
            .with_nesting_level(1)
            .finalize(5);
        assert_eq!(backend.nesting_level(), 1);
    }

    #[test]
    fn test_inner_threads_supported() {
        let descriptor = BackendDescriptor::of(ProcessPoolKind)
            .with_inner_max_num_threads(2)
            .unwrap();
        let backend = descriptor.finalize(0);
        assert_eq!(backend.inner_max_num_threads(), Some(2));
    }

    #[test]
    fn test_inner_threads_unsupported() {
        let result = BackendDescriptor::of(ThreadingKind).with_inner_max_num_threads(2);
        assert_eq!(
            result.unwrap_err(),
            UsageError::InnerThreadsUnsupported {
                backend: "threading".to_string()
            }
        );
    }

    #[test]
    fn test_active_copy_leaves_original() {
        let original = BackendDescriptor::of(ProcessPoolKind).finalize(0);
        let capped = original.with_inner_max_num_threads(4).unwrap();
        assert_eq!(original.inner_max_num_threads(), None);
        assert_eq!(capped.inner_max_num_threads(), Some(4));
    }

    #[test]
    fn test_params_preserved() {
        let mut params = BackendParams::new();
        params.insert("idle_worker_timeout".to_string(), serde_json::json!(30));
        let backend = BackendDescriptor::of(ProcessPoolKind)
            .with_params(params)
            .finalize(0);
        assert_eq!(
            backend.params().get("idle_worker_timeout"),
            Some(&serde_json::json!(30))
        );
    }
}
