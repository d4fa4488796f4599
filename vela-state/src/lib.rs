//! Vela State Management
//!
//! This crate owns the state document that records managed infrastructure
//! and the managers that persist it. The state management system consists
//! of:
//!
//! - **StateFile**: the state document, including the embedded legacy
//!   `remote` stanza and the saved `backend` stanza
//! - **StateManager**: a uniform handle over any persistent state store
//! - **LocalStateManager**: file-backed manager with atomic writes and a
//!   one-shot backup sibling
//! - **MetaStore**: the tool-private metadata file recording the last-used
//!   backend configuration

pub mod local;
pub mod manager;
pub mod meta;
pub mod state;

pub use local::LocalStateManager;
pub use manager::{InmemStateManager, StateManager};
pub use meta::{MetaStore, DEFAULT_BACKUP_EXTENSION, DEFAULT_DATA_DIR, DEFAULT_STATE_FILENAME};
pub use state::{BackendRecord, ModuleState, RemoteRecord, ResourceState, StateError, StateFile};
