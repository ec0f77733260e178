//! Backend resolution.
//!
//! Turns the active scope chain plus per-call hints into the backend a
//! parallel call should use right now. The rules, in order:
//!
//! 1. Every parameter resolves to the innermost explicit setting, or its
//!    built-in default.
//! 2. `prefer="processes"` with `require="sharedmem"` is rejected before any
//!    backend is built.
//! 3. With no backend set anywhere, the registry default is built at nesting
//!    level 0 and counts as an implicit choice.
//! 4. A thread backend replaces the resolved one when `require="sharedmem"`
//!    and the backend cannot share memory, or when the choice was implicit,
//!    `prefer="threads"`, and the backend is not thread-based. The
//!    replacement runs with one job and keeps the replaced nesting level.

use crate::context::current_snapshot;
use crate::keys::{BackendKey, NJobsKey, PreferKey, RequireKey, VerboseKey};
use crate::snapshot::{ConfigSnapshot, get_config_param};
use std::sync::Arc;
use switchyard_backend::registry::{self, DEFAULT_THREAD_BACKEND};
use switchyard_backend::{ActiveBackend, NestedPolicy, SharedRegistry};
use switchyard_core::{Prefer, Require, Result, Setting, UsageError};

/// Verbosity from which a forced fallback is reported
pub const FALLBACK_NOTICE_VERBOSITY: u32 = 10;

/// Resolve the active backend against the process-wide registry
///
/// Returns the backend and the snapshot to use for further lookups.
///
/// # Errors
///
/// Returns error if the hints contradict each other or a backend cannot be
/// built
pub fn resolve_active_backend(
    prefer: Setting<Option<Prefer>>,
    require: Setting<Option<Require>>,
    verbose: Setting<u32>,
) -> Result<(Arc<ActiveBackend>, Arc<ConfigSnapshot>)> {
    resolve_active_backend_in(registry::global(), prefer, require, verbose)
}

/// Resolve the active backend against a given registry
///
/// # Errors
///
/// Returns error if the hints contradict each other or a backend cannot be
/// built
pub fn resolve_active_backend_in(
    registry: &SharedRegistry,
    prefer: Setting<Option<Prefer>>,
    require: Setting<Option<Require>>,
    verbose: Setting<u32>,
) -> Result<(Arc<ActiveBackend>, Arc<ConfigSnapshot>)> {
    let scope = current_snapshot();
    resolve_in_scope(registry, &scope, prefer, require, verbose)
}

/// Resolve against an explicit scope instead of the thread's active one
///
/// # Errors
///
/// Returns error if the hints contradict each other or a backend cannot be
/// built
pub fn resolve_in_scope(
    registry: &SharedRegistry,
    scope: &Arc<ConfigSnapshot>,
    prefer: Setting<Option<Prefer>>,
    require: Setting<Option<Require>>,
    verbose: Setting<u32>,
) -> Result<(Arc<ActiveBackend>, Arc<ConfigSnapshot>)> {
    let resolution = resolve_with_notice(registry, scope, prefer, require, verbose)?;
    if let Some(notice) = &resolution.notice {
        tracing::info!("{notice}");
    }
    Ok((resolution.backend, resolution.config))
}

/// Outcome of one resolution, before anything is logged
#[derive(Debug)]
pub(crate) struct Resolution {
    pub(crate) backend: Arc<ActiveBackend>,
    pub(crate) config: Arc<ConfigSnapshot>,
    pub(crate) notice: Option<String>,
}

pub(crate) fn resolve_with_notice(
    registry: &SharedRegistry,
    scope: &Arc<ConfigSnapshot>,
    prefer: Setting<Option<Prefer>>,
    require: Setting<Option<Require>>,
    verbose: Setting<u32>,
) -> Result<Resolution> {
    let backend = get_config_param::<BackendKey>(Setting::Unset, scope);
    let prefer = get_config_param::<PreferKey>(prefer, scope);
    let require = get_config_param::<RequireKey>(require, scope);
    let verbose = get_config_param::<VerboseKey>(verbose, scope);

    if prefer == Some(Prefer::Processes) && require == Some(Require::SharedMem) {
        return Err(UsageError::InconsistentHints.into());
    }

    let (backend, explicit) = match backend {
        Some(backend) => (backend, true),
        None => (Arc::new(registry.create_default(0)?), false),
    };

    let force_threads = (require == Some(Require::SharedMem) && !backend.supports_sharedmem())
        || (!explicit && prefer == Some(Prefer::Threads) && !backend.uses_threads());
    if !force_threads {
        return Ok(Resolution {
            backend,
            config: Arc::clone(scope),
            notice: None,
        });
    }

    let thread_backend = Arc::new(registry.create_thread_backend(backend.nesting_level())?);
    let notice = fallback_notice(&backend, &thread_backend, explicit, verbose);
    if notice.is_none() {
        tracing::debug!(
            from = backend.name(),
            to = thread_backend.name(),
            explicit,
            "forcing thread-based backend"
        );
    }

    let config = Arc::new(ConfigSnapshot::forced(
        Arc::clone(&thread_backend),
        Arc::clone(scope),
    ));
    Ok(Resolution {
        backend: thread_backend,
        config,
        notice,
    })
}

/// The user-facing message for a forced fallback, if one should be shown
///
/// Only fallbacks away from an explicitly chosen backend are reported, and
/// only at verbosity [`FALLBACK_NOTICE_VERBOSITY`] or above. Downgrades of
/// the implicit default stay silent.
#[must_use]
pub fn fallback_notice(
    replaced: &ActiveBackend,
    replacement: &ActiveBackend,
    explicit: bool,
    verbose: u32,
) -> Option<String> {
    (explicit && verbose >= FALLBACK_NOTICE_VERBOSITY).then(|| {
        format!(
            "Using {} as backend instead of {} as the latter does not provide shared memory semantics.",
            replacement.name(),
            replaced.name()
        )
    })
}

/// Active backend and resolved `n_jobs`, against the process-wide registry
///
/// # Errors
///
/// Returns error if resolution fails
pub fn get_active_backend(
    prefer: Setting<Option<Prefer>>,
    require: Setting<Option<Require>>,
    verbose: Setting<u32>,
) -> Result<(Arc<ActiveBackend>, Option<i32>)> {
    get_active_backend_in(registry::global(), prefer, require, verbose)
}

/// Active backend and resolved `n_jobs`, against a given registry
///
/// # Errors
///
/// Returns error if resolution fails
pub fn get_active_backend_in(
    registry: &SharedRegistry,
    prefer: Setting<Option<Prefer>>,
    require: Setting<Option<Require>>,
    verbose: Setting<u32>,
) -> Result<(Arc<ActiveBackend>, Option<i32>)> {
    let (backend, config) = resolve_active_backend_in(registry, prefer, require, verbose)?;
    let n_jobs = get_config_param::<NJobsKey>(Setting::Unset, &config);
    Ok((backend, n_jobs))
}

/// Number of workers the active backend would run for `n_jobs`
///
/// An unset `n_jobs` takes the value resolved from the active scopes.
///
/// # Errors
///
/// Returns error if resolution fails or the resolved count is zero
pub fn effective_n_jobs(n_jobs: Setting<Option<i32>>) -> Result<usize> {
    effective_n_jobs_in(registry::global(), n_jobs)
}

/// [`effective_n_jobs`] against a given registry
///
/// # Errors
///
/// Returns error if resolution fails or the resolved count is zero
pub fn effective_n_jobs_in(
    registry: &SharedRegistry,
    n_jobs: Setting<Option<i32>>,
) -> Result<usize> {
    if n_jobs == Setting::Explicit(Some(1)) {
        return Ok(1);
    }
    let (backend, config) =
        resolve_active_backend_in(registry, Setting::Unset, Setting::Unset, Setting::Unset)?;
    let n_jobs = get_config_param::<NJobsKey>(n_jobs, &config);
    Ok(backend.effective_n_jobs(n_jobs)?)
}

/// Backend for work running inside one of `backend`'s workers
///
/// # Errors
///
/// Returns error if the nested backend cannot be built
pub fn nested_backend(backend: &ActiveBackend) -> Result<(Arc<ActiveBackend>, Option<i32>)> {
    nested_backend_in(registry::global(), backend)
}

/// [`nested_backend`] against a given registry
///
/// Kinds with [`NestedPolicy::InheritActive`] hand back whatever is active
/// for the caller. Otherwise nested work goes one level deeper: threads for
/// the first nested level, sequential below that.
///
/// # Errors
///
/// Returns error if the nested backend cannot be built
pub fn nested_backend_in(
    registry: &SharedRegistry,
    backend: &ActiveBackend,
) -> Result<(Arc<ActiveBackend>, Option<i32>)> {
    match backend.nested_policy() {
        NestedPolicy::InheritActive => {
            get_active_backend_in(registry, Setting::Unset, Setting::Unset, Setting::Unset)
        }
        NestedPolicy::Descend => {
            let level = backend.nesting_level() + 1;
            let name = if level > 1 {
                "sequential"
            } else {
                DEFAULT_THREAD_BACKEND
            };
            let nested = registry
                .create(name, Default::default())?
                .with_nesting_level(level)
                .finalize(level);
            Ok((Arc::new(nested), None))
        }
    }
}
