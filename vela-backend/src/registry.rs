//! Backend registry
//!
//! Process-wide mapping from backend type name to a zero-argument
//! constructor yielding a fresh, unconfigured instance. The default table
//! is populated once, before the resolver runs, and is read-only after
//! that. Legacy remote adapters share the namespace under their remote
//! type names.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::backend::Backend;
use crate::inmem::InmemBackend;
use crate::legacy::{LegacyBackend, LEGACY_REMOTE_TYPES};
use crate::local::LocalBackend;

type Constructor = Box<dyn Fn() -> Box<dyn Backend> + Send + Sync>;

pub struct Registry {
    backends: HashMap<String, Constructor>,
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Registry holding every built-in backend and legacy adapter
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("local", || Box::new(LocalBackend::new()));
        registry.register("inmem", || Box::new(InmemBackend::new()));
        for remote_type in LEGACY_REMOTE_TYPES {
            registry.register(*remote_type, move || {
                Box::new(LegacyBackend::new(*remote_type))
            });
        }
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn Backend> + Send + Sync + 'static,
    {
        self.backends.insert(name.into(), Box::new(constructor));
    }

    /// Instantiate a fresh, unconfigured backend of the given type
    pub fn create(&self, name: &str) -> Option<Box<dyn Backend>> {
        self.backends.get(name).map(|constructor| constructor())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Registered type names, sorted for stable error messages
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// The process-wide registry
pub fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::with_defaults)
}
