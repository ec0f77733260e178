//! Built-in backend kinds.
//!
//! These describe the executors that ship alongside the resolver. Only their
//! capabilities and worker-count rules live here.

use crate::descriptor::{BackendDescriptor, BackendParams};
use crate::kind::{BackendCapabilities, BackendKind, NestedPolicy, cpu_bounded_jobs};
use crate::registry::BackendRegistry;
use switchyard_core::{ConfigurationError, Result, UsageError};

/// Runs every task inline in the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialKind;

impl BackendKind for SequentialKind {
    fn name(&self) -> &str {
        "sequential"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::threads()
    }

    fn nested_policy(&self) -> NestedPolicy {
        NestedPolicy::InheritActive
    }

    fn effective_n_jobs(
        &self,
        n_jobs: Option<i32>,
        _nesting_level: usize,
    ) -> std::result::Result<usize, UsageError> {
        if n_jobs == Some(0) {
            return Err(UsageError::ZeroJobs);
        }
        Ok(1)
    }
}

/// Pool of threads in the calling process
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadingKind;

impl BackendKind for ThreadingKind {
    fn name(&self) -> &str {
        "threading"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::threads()
    }
}

/// Reusable pool of worker processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessPoolKind;

impl BackendKind for ProcessPoolKind {
    fn name(&self) -> &str {
        "processes"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::processes()
    }

    fn effective_n_jobs(
        &self,
        n_jobs: Option<i32>,
        nesting_level: usize,
    ) -> std::result::Result<usize, UsageError> {
        process_jobs(self.name(), n_jobs, nesting_level)
    }
}

/// Pool of forked worker processes, created per batch
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiprocessingKind;

impl BackendKind for MultiprocessingKind {
    fn name(&self) -> &str {
        "multiprocessing"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::processes()
    }

    fn effective_n_jobs(
        &self,
        n_jobs: Option<i32>,
        nesting_level: usize,
    ) -> std::result::Result<usize, UsageError> {
        process_jobs(self.name(), n_jobs, nesting_level)
    }
}

/// Tasks shipped to a cluster scheduler
#[cfg(feature = "distributed")]
#[derive(Debug, Clone, Copy, Default)]
pub struct DistributedKind;

#[cfg(feature = "distributed")]
impl BackendKind for DistributedKind {
    fn name(&self) -> &str {
        "distributed"
    }
}

// Process pools cannot be started from inside a worker.
fn process_jobs(
    name: &str,
    n_jobs: Option<i32>,
    nesting_level: usize,
) -> std::result::Result<usize, UsageError> {
    let jobs = cpu_bounded_jobs(n_jobs)?;
    if nesting_level > 0 && jobs > 1 {
        tracing::warn!(
            backend = name,
            nesting_level,
            "{name}-backed parallel loops cannot be nested, setting n_jobs=1"
        );
        return Ok(1);
    }
    Ok(jobs)
}

pub(crate) fn sequential_factory(params: BackendParams) -> Result<BackendDescriptor> {
    Ok(BackendDescriptor::of(SequentialKind).with_params(params))
}

pub(crate) fn threading_factory(params: BackendParams) -> Result<BackendDescriptor> {
    Ok(BackendDescriptor::of(ThreadingKind).with_params(params))
}

pub(crate) fn multiprocessing_factory(params: BackendParams) -> Result<BackendDescriptor> {
    Ok(BackendDescriptor::of(MultiprocessingKind).with_params(params))
}

pub(crate) fn process_pool_factory(params: BackendParams) -> Result<BackendDescriptor> {
    if let Some(timeout) = params.get("idle_worker_timeout") {
        let valid = timeout.as_f64().is_some_and(|secs| secs >= 0.0);
        if !valid {
            return Err(ConfigurationError::FactoryFailed {
                name: "processes".to_string(),
                reason: format!("idle_worker_timeout must be a non-negative number, got {timeout}"),
            }
            .into());
        }
    }
    Ok(BackendDescriptor::of(ProcessPoolKind).with_params(params))
}

/// Installer for the `distributed` name
///
/// # Errors
///
/// Never fails when the `distributed` feature is enabled
#[cfg(feature = "distributed")]
pub fn install_distributed(registry: &mut BackendRegistry) -> Result<()> {
    registry.register(
        "distributed",
        |params: BackendParams| Ok(BackendDescriptor::of(DistributedKind).with_params(params)),
        false,
    );
    Ok(())
}

/// Installer for the `distributed` name
///
/// # Errors
///
/// Always returns `ConfigurationError::MissingCapability`: the crate was
/// built without the `distributed` feature
#[cfg(not(feature = "distributed"))]
pub fn install_distributed(_registry: &mut BackendRegistry) -> Result<()> {
    Err(ConfigurationError::MissingCapability {
        backend: "distributed".to_string(),
        capability: "a build of switchyard_backend with the `distributed` feature enabled"
            .to_string(),
    }
    .into())
}
