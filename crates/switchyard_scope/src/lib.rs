//! SWITCHYARD Scopes
//!
//! Nested configuration scopes and the resolver that turns them into a ready
//! backend. Each thread has one active [`ConfigSnapshot`]; entering a
//! [`ParallelConfig`] pushes a new snapshot whose parent is the previous one,
//! and dropping the returned guard pops it again. The resolver walks that
//! chain innermost-first to decide which backend a parallel call should use.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod keys;
pub mod resolve;
pub mod scope;
pub mod snapshot;

pub use context::{current_snapshot, with_snapshot};
pub use keys::{
    BackendKey, ConfigKey, MaxNbytesKey, MmapModeKey, NJobsKey, PreferKey, RequireKey,
    TempFolderKey, VerboseKey,
};
pub use resolve::{
    FALLBACK_NOTICE_VERBOSITY, effective_n_jobs, effective_n_jobs_in, fallback_notice,
    get_active_backend, get_active_backend_in, nested_backend, nested_backend_in,
    resolve_active_backend, resolve_active_backend_in, resolve_in_scope,
};
pub use scope::{BackendChoice, BackendGuard, BackendScope, ParallelConfig, ScopeGuard};
pub use snapshot::{ConfigSnapshot, SnapshotView, get_config_param};
