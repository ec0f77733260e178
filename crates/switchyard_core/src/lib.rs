//! SWITCHYARD Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! Everything the backend registry and the scope chain share lives here:
//! the explicit/unset setting tag, the hint and constraint types, and the
//! error taxonomy.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hints;
pub mod setting;

// Re-exports
pub use error::{ConfigurationError, Result, SwitchyardError, UsageError};
pub use hints::{ByteSize, MmapMode, Prefer, Require};
pub use setting::Setting;
