//! Configuration keys.
//!
//! Every key is a zero-sized marker type. The marker owns the key's name, its
//! built-in default, and how to read it from a snapshot, so the chain walk in
//! [`get_config_param`](crate::snapshot::get_config_param) is generic over
//! keys and cannot mix one key's default up with another's.

use crate::snapshot::ConfigSnapshot;
use std::path::PathBuf;
use std::sync::Arc;
use switchyard_backend::ActiveBackend;
use switchyard_core::{ByteSize, MmapMode, Prefer, Require, Setting};

/// A configuration parameter that can be set per scope
pub trait ConfigKey {
    /// Resolved value type
    type Value: Clone;

    /// Parameter name
    const NAME: &'static str;

    /// Value when no scope sets the parameter
    fn default_value() -> Self::Value;

    /// The parameter as stored in one snapshot
    fn lookup(snapshot: &ConfigSnapshot) -> Setting<Self::Value>;
}

/// Backend instance; `None` means "use the registry default"
#[derive(Debug, Clone, Copy)]
pub struct BackendKey;

impl ConfigKey for BackendKey {
    type Value = Option<Arc<ActiveBackend>>;
    const NAME: &'static str = "backend";

    fn default_value() -> Self::Value {
        None
    }

    fn lookup(snapshot: &ConfigSnapshot) -> Setting<Self::Value> {
        snapshot.backend.clone().map(Some)
    }
}

/// Requested worker count; `None` lets the backend decide
#[derive(Debug, Clone, Copy)]
pub struct NJobsKey;

impl ConfigKey for NJobsKey {
    type Value = Option<i32>;
    const NAME: &'static str = "n_jobs";

    fn default_value() -> Self::Value {
        None
    }

    fn lookup(snapshot: &ConfigSnapshot) -> Setting<Self::Value> {
        snapshot.n_jobs
    }
}

/// Verbosity level
#[derive(Debug, Clone, Copy)]
pub struct VerboseKey;

impl ConfigKey for VerboseKey {
    type Value = u32;
    const NAME: &'static str = "verbose";

    fn default_value() -> Self::Value {
        0
    }

    fn lookup(snapshot: &ConfigSnapshot) -> Setting<Self::Value> {
        snapshot.verbose
    }
}

/// Folder for memory-mapped arguments; `None` lets the mapper choose
#[derive(Debug, Clone, Copy)]
pub struct TempFolderKey;

impl ConfigKey for TempFolderKey {
    type Value = Option<PathBuf>;
    const NAME: &'static str = "temp_folder";

    fn default_value() -> Self::Value {
        None
    }

    fn lookup(snapshot: &ConfigSnapshot) -> Setting<Self::Value> {
        snapshot.temp_folder.clone()
    }
}

/// Memory-mapping threshold; `None` disables memory-mapping
#[derive(Debug, Clone, Copy)]
pub struct MaxNbytesKey;

impl ConfigKey for MaxNbytesKey {
    type Value = Option<ByteSize>;
    const NAME: &'static str = "max_nbytes";

    fn default_value() -> Self::Value {
        Some(ByteSize::from_bytes(ByteSize::MIB))
    }

    fn lookup(snapshot: &ConfigSnapshot) -> Setting<Self::Value> {
        snapshot.max_nbytes
    }
}

/// Memory-mapping mode
#[derive(Debug, Clone, Copy)]
pub struct MmapModeKey;

impl ConfigKey for MmapModeKey {
    type Value = Option<MmapMode>;
    const NAME: &'static str = "mmap_mode";

    fn default_value() -> Self::Value {
        Some(MmapMode::ReadOnly)
    }

    fn lookup(snapshot: &ConfigSnapshot) -> Setting<Self::Value> {
        snapshot.mmap_mode
    }
}

/// Soft backend hint
#[derive(Debug, Clone, Copy)]
pub struct PreferKey;

impl ConfigKey for PreferKey {
    type Value = Option<Prefer>;
    const NAME: &'static str = "prefer";

    fn default_value() -> Self::Value {
        None
    }

    fn lookup(snapshot: &ConfigSnapshot) -> Setting<Self::Value> {
        snapshot.prefer
    }
}

/// Hard backend constraint
#[derive(Debug, Clone, Copy)]
pub struct RequireKey;

impl ConfigKey for RequireKey {
    type Value = Option<Require>;
    const NAME: &'static str = "require";

    fn default_value() -> Self::Value {
        None
    }

    fn lookup(snapshot: &ConfigSnapshot) -> Setting<Self::Value> {
        snapshot.require
    }
}
