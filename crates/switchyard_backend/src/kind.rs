//! Backend kind trait

use serde::{Deserialize, Serialize};
use switchyard_core::UsageError;

/// What an executor can do, as seen by the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BackendCapabilities {
    /// Workers are threads of the calling process
    pub uses_threads: bool,
    /// Workers see the caller's memory
    pub supports_sharedmem: bool,
    /// Workers accept a cap on their own inner thread pools
    pub supports_inner_max_num_threads: bool,
}

impl BackendCapabilities {
    /// Capabilities of a thread-based executor
    #[must_use]
    pub const fn threads() -> Self {
        Self {
            uses_threads: true,
            supports_sharedmem: true,
            supports_inner_max_num_threads: false,
        }
    }

    /// Capabilities of a process-based executor
    #[must_use]
    pub const fn processes() -> Self {
        Self {
            uses_threads: false,
            supports_sharedmem: false,
            supports_inner_max_num_threads: true,
        }
    }
}

/// How work running inside a worker picks its own backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NestedPolicy {
    /// Nested calls see whatever backend is active for the caller
    InheritActive,
    /// Nested calls go one level deeper: threads first, then sequential
    Descend,
}

/// A family of executors that the registry can hand out
pub trait BackendKind: std::fmt::Debug + Send + Sync {
    /// Kind name used in logs and messages
    fn name(&self) -> &str;

    /// Capability flags
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    /// Nested work policy
    fn nested_policy(&self) -> NestedPolicy {
        NestedPolicy::Descend
    }

    /// Number of workers this kind would actually run for `n_jobs`
    ///
    /// # Errors
    ///
    /// Returns `UsageError::ZeroJobs` for `Some(0)`
    fn effective_n_jobs(
        &self,
        n_jobs: Option<i32>,
        _nesting_level: usize,
    ) -> Result<usize, UsageError> {
        cpu_bounded_jobs(n_jobs)
    }
}

/// Map an `n_jobs` request onto the CPUs of this machine
///
/// `None` means one worker, negative values count back from the number of
/// CPUs (`-1` is all of them), and the result is never below one.
///
/// # Errors
///
/// Returns `UsageError::ZeroJobs` for `Some(0)`
pub fn cpu_bounded_jobs(n_jobs: Option<i32>) -> Result<usize, UsageError> {
    match n_jobs {
        None => Ok(1),
        Some(0) => Err(UsageError::ZeroJobs),
        Some(n) if n > 0 => Ok(n as usize),
        Some(n) => {
            let cpus = num_cpus::get() as i64;
            Ok((cpus + 1 + i64::from(n)).max(1) as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct BareKind;

    impl BackendKind for BareKind {
        fn name(&self) -> &str {
            "bare"
        }
    }

    #[test]
    fn test_default_capabilities_are_false() {
        let caps = BareKind.capabilities();
        assert!(!caps.uses_threads);
        assert!(!caps.supports_sharedmem);
        assert!(!caps.supports_inner_max_num_threads);
        assert_eq!(BareKind.nested_policy(), NestedPolicy::Descend);
    }

    #[test]
    fn test_cpu_bounded_jobs() {
        assert_eq!(cpu_bounded_jobs(None), Ok(1));
        assert_eq!(cpu_bounded_jobs(Some(3)), Ok(3));
        assert_eq!(cpu_bounded_jobs(Some(0)), Err(UsageError::ZeroJobs));
        assert_eq!(cpu_bounded_jobs(Some(-1)), Ok(num_cpus::get()));
    }

    #[test]
    fn test_cpu_bounded_jobs_never_below_one() {
        assert_eq!(cpu_bounded_jobs(Some(i32::MIN)), Ok(1));
    }

    #[test]
    fn test_capability_presets() {
        assert!(BackendCapabilities::threads().supports_sharedmem);
        assert!(!BackendCapabilities::processes().supports_sharedmem);
        assert!(BackendCapabilities::processes().supports_inner_max_num_threads);
    }

    proptest::proptest! {
        #[test]
        fn prop_cpu_bounded_jobs_at_least_one(n in proptest::prelude::any::<i32>()) {
            proptest::prop_assume!(n != 0);
            let jobs = cpu_bounded_jobs(Some(n)).unwrap();
            proptest::prop_assert!(jobs >= 1);
            if n > 0 {
                proptest::prop_assert_eq!(jobs, n as usize);
            }
        }
    }
}
