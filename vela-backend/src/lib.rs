//! Vela Backends
//!
//! A backend persists infrastructure state and, if enhanced, executes
//! operations against it. This crate provides:
//!
//! - **Backend / Enhanced**: the contract every backend implements
//! - **Registry**: the process-wide map from type name to constructor
//! - **LocalBackend**: the enhanced local backend, also used to wrap any
//!   non-enhanced backend so callers always receive an operation-capable
//!   handle
//! - **InmemBackend**: a plain in-memory backend
//! - **LegacyBackend**: adapter serving the older typed-remote protocol
//!   (`http`, `consul`, `atlas`) behind the same contract
//! - **Prompter**: the capability interface for asking the user questions

pub mod backend;
pub mod inmem;
pub mod legacy;
pub mod local;
pub mod prompt;
pub mod registry;
pub mod remote;

pub use backend::{
    Backend, BackendConfig, BackendError, BackendResult, Enhanced, Operation, OperationKind,
    OperationSummary,
};
pub use inmem::InmemBackend;
pub use legacy::LegacyBackend;
pub use local::LocalBackend;
pub use prompt::{DisabledPrompter, PromptError, Prompter, ScriptedPrompter};
pub use registry::{registry, Registry};
