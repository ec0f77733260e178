//! SWITCHYARD Backend System
//!
//! Backend kinds describe what an executor can do (threads or processes,
//! shared memory, inner thread limits). Descriptors are built by named
//! factories in the registry and finalized into immutable, shareable
//! [`ActiveBackend`] values once their nesting level is known.
//! The executors themselves live outside this crate.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builtin;
pub mod descriptor;
pub mod kind;
pub mod registry;

pub use builtin::{MultiprocessingKind, ProcessPoolKind, SequentialKind, ThreadingKind};
pub use descriptor::{ActiveBackend, BackendDescriptor, BackendParams};
pub use kind::{BackendCapabilities, BackendKind, NestedPolicy};
pub use registry::{
    BackendFactory, BackendRegistry, Installer, RuntimeSupport, SharedRegistry, global,
    register_backend, register_external,
};
