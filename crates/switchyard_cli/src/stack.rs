//! Scope stacks read from JSON.
//!
//! A scopes file is a JSON array of objects, outermost scope first. Keys
//! left out are inherited; a key set to `null` is set explicitly to "none".
//!
//! ```json
//! [
//!   { "backend": "processes", "temp_folder": "/scratch", "verbose": 5 },
//!   { "require": "sharedmem" }
//! ]
//! ```

use color_eyre::eyre::WrapErr;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use switchyard_backend::{BackendParams, SharedRegistry};
use switchyard_core::{ByteSize, MmapMode, Prefer, Require};
use switchyard_scope::{ParallelConfig, ScopeGuard};

/// One scope as written in a scopes file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScopeSpec {
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default, deserialize_with = "explicit")]
    pub n_jobs: Option<Option<i32>>,
    #[serde(default)]
    pub verbose: Option<u32>,
    #[serde(default, deserialize_with = "explicit")]
    pub temp_folder: Option<Option<PathBuf>>,
    #[serde(default, deserialize_with = "explicit")]
    pub max_nbytes: Option<Option<ByteSize>>,
    #[serde(default, deserialize_with = "explicit")]
    pub mmap_mode: Option<Option<MmapMode>>,
    #[serde(default, deserialize_with = "explicit")]
    pub prefer: Option<Option<Prefer>>,
    #[serde(default, deserialize_with = "explicit")]
    pub require: Option<Option<Require>>,
    #[serde(default)]
    pub inner_max_num_threads: Option<usize>,
    #[serde(default)]
    pub params: BackendParams,
}

// A present key, even `null`, is an explicit setting.
fn explicit<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl ScopeSpec {
    /// Builder for this scope
    pub fn to_config(&self) -> ParallelConfig {
        let mut config = ParallelConfig::new().params(self.params.clone());
        if let Some(backend) = &self.backend {
            config = config.backend(backend.as_str());
        }
        if let Some(n_jobs) = self.n_jobs {
            config = config.n_jobs(n_jobs);
        }
        if let Some(verbose) = self.verbose {
            config = config.verbose(verbose);
        }
        match &self.temp_folder {
            Some(Some(folder)) => config = config.temp_folder(folder),
            Some(None) => config = config.no_temp_folder(),
            None => {}
        }
        if let Some(max_nbytes) = self.max_nbytes {
            config = config.max_nbytes(max_nbytes);
        }
        if let Some(mode) = self.mmap_mode {
            config = config.mmap_mode(mode);
        }
        if let Some(prefer) = self.prefer {
            config = config.prefer(prefer);
        }
        if let Some(require) = self.require {
            config = config.require(require);
        }
        if let Some(threads) = self.inner_max_num_threads {
            config = config.inner_max_num_threads(threads);
        }
        config
    }
}

/// Parse a scopes document
pub fn parse(text: &str) -> serde_json::Result<Vec<ScopeSpec>> {
    serde_json::from_str(text)
}

/// Read and parse a scopes file
pub fn load(path: &Path) -> color_eyre::Result<Vec<ScopeSpec>> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read scopes file {}", path.display()))?;
    parse(&text).wrap_err_with(|| format!("invalid scopes file {}", path.display()))
}

/// Entered scopes, exited innermost first on drop
#[derive(Debug, Default)]
pub struct ScopeStack {
    guards: Vec<ScopeGuard>,
}

impl ScopeStack {
    /// Enter every scope in order
    ///
    /// On error the scopes entered so far are exited again.
    pub fn enter(specs: &[ScopeSpec], registry: &SharedRegistry) -> switchyard_core::Result<Self> {
        let mut stack = Self::default();
        for (depth, spec) in specs.iter().enumerate() {
            tracing::debug!(depth, ?spec, "entering scope from file");
            stack.guards.push(spec.to_config().enter_in(registry)?);
        }
        Ok(stack)
    }

    /// Number of entered scopes
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Check if no scope was entered
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl Drop for ScopeStack {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            guard.exit();
        }
    }
}
