//! Error types for SWITCHYARD.
//!
//! Two families exist. A [`UsageError`] means the caller asked for something
//! that can never work (bad hint value, contradictory constraints, knobs that
//! the chosen backend does not have). A [`ConfigurationError`] means the
//! request was well formed but this process cannot provide the backend it
//! names. Both are raised when a scope is constructed or a backend is
//! resolved, never later.

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, SwitchyardError>;

/// Invalid arguments supplied to a scope or a resolution call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    /// `prefer` is not one of the known hints
    #[error("prefer={value:?} is not a valid backend hint, expected one of: \"processes\", \"threads\"")]
    InvalidPrefer {
        /// Rejected value
        value: String,
    },

    /// `require` is not one of the known constraints
    #[error("require={value:?} is not a valid backend constraint, expected: \"sharedmem\"")]
    InvalidRequire {
        /// Rejected value
        value: String,
    },

    /// `prefer="processes"` together with `require="sharedmem"`
    #[error("prefer == \"processes\" and require == \"sharedmem\" are inconsistent settings")]
    InconsistentHints,

    /// Backend construction parameters without a named backend
    #[error("inner_max_num_threads and other backend parameters are only supported when a backend is named")]
    BackendParamsWithoutBackend,

    /// `inner_max_num_threads` set on a backend that has no such knob
    #[error("backend {backend:?} does not accept setting inner_max_num_threads")]
    InnerThreadsUnsupported {
        /// Name of the backend kind
        backend: String,
    },

    /// `n_jobs == 0`
    #[error("n_jobs == 0 has no meaning")]
    ZeroJobs,

    /// Byte size literal that cannot be parsed
    #[error("invalid literal for size: {value:?}")]
    InvalidByteSize {
        /// Rejected literal
        value: String,
    },

    /// Unknown memory-map mode
    #[error("mmap_mode={value:?} is not valid, expected one of: \"r\", \"r+\", \"w+\", \"c\"")]
    InvalidMmapMode {
        /// Rejected value
        value: String,
    },
}

/// A backend that cannot be provided in this process
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// Name is neither registered nor installable
    #[error("invalid backend: {name:?}, expected one of {available:?}")]
    UnknownBackend {
        /// Requested name
        name: String,
        /// Registered names, sorted
        available: Vec<String>,
    },

    /// An optional integration is missing the support it needs
    #[error("to use the {backend:?} backend you must provide {capability}")]
    MissingCapability {
        /// Requested name
        backend: String,
        /// What is missing
        capability: String,
    },

    /// An installer returned success without registering its name
    #[error("installer for backend {name:?} completed but did not register it")]
    InstallerDidNotRegister {
        /// Requested name
        name: String,
    },

    /// A factory rejected its construction parameters
    #[error("factory for backend {name:?} failed: {reason}")]
    FactoryFailed {
        /// Backend name
        name: String,
        /// Reason reported by the factory
        reason: String,
    },
}

/// Top-level error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SwitchyardError {
    /// Invalid usage
    #[error(transparent)]
    Usage(#[from] UsageError),

    /// Backend not available
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl SwitchyardError {
    /// Whether this is a usage error
    #[must_use]
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    /// Whether this is a configuration error
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SwitchyardError::from(UsageError::InconsistentHints);
        assert_eq!(
            format!("{}", err),
            "prefer == \"processes\" and require == \"sharedmem\" are inconsistent settings"
        );

        let err = SwitchyardError::from(ConfigurationError::UnknownBackend {
            name: "nope".to_string(),
            available: vec!["sequential".to_string(), "threading".to_string()],
        });
        let s = format!("{}", err);
        assert!(s.contains("nope"));
        assert!(s.contains("threading"));
    }

    #[test]
    fn test_missing_capability_names_capability() {
        let err = ConfigurationError::MissingCapability {
            backend: "distributed".to_string(),
            capability: "the `distributed` feature".to_string(),
        };
        let s = format!("{}", err);
        assert!(s.contains("distributed"));
        assert!(s.contains("feature"));
    }

    #[test]
    fn test_error_classification() {
        let usage = SwitchyardError::from(UsageError::ZeroJobs);
        assert!(usage.is_usage());
        assert!(!usage.is_configuration());

        let config = SwitchyardError::from(ConfigurationError::InstallerDidNotRegister {
            name: "x".to_string(),
        });
        assert!(config.is_configuration());
        assert!(!config.is_usage());
    }

    #[test]
    fn test_error_equality() {
        let err1 = SwitchyardError::from(UsageError::InconsistentHints);
        let err2 = SwitchyardError::from(UsageError::InconsistentHints);
        assert_eq!(err1, err2);

        let err3 = SwitchyardError::from(UsageError::ZeroJobs);
        assert_ne!(err1, err3);
    }
}
