//! Vela command layer
//!
//! Hosts everything the `vela` binary needs around the backends: the
//! configuration loader, the backend resolution decision machine, the
//! state migration engine, and the terminal prompter.

pub mod config;
pub mod meta;
pub mod migrate;
pub mod prompt;

pub use meta::{BackendOpts, Resolution, Session, SetupError};
