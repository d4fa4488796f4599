//! In-memory backend
//!
//! A plain (non-enhanced) backend holding state in process memory. Useful
//! as a migration target in tests and as the smallest possible state-only
//! backend; callers receive it wrapped in the enhanced local backend.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use vela_state::{InmemStateManager, StateFile, StateManager};

use crate::backend::{Backend, BackendConfig, BackendResult};

#[derive(Default)]
pub struct InmemBackend {
    shared: Arc<Mutex<Option<StateFile>>>,
}

impl InmemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared slot backing every manager this backend hands out
    pub fn shared(&self) -> Arc<Mutex<Option<StateFile>>> {
        Arc::clone(&self.shared)
    }
}

#[async_trait]
impl Backend for InmemBackend {
    fn validate(&self, config: &BackendConfig) -> (Vec<String>, Vec<String>) {
        let mut errors = Vec::new();
        if let Some(value) = config.attributes.get("lineage") {
            if !value.is_string() {
                errors.push("attribute \"lineage\" must be a string".to_string());
            }
        }
        (Vec::new(), errors)
    }

    async fn configure(&mut self, config: &BackendConfig) -> BackendResult<()> {
        // An explicit lineage seeds the store with an empty document, so
        // fixtures can model a pre-existing remote state.
        if let Some(lineage) = config.get_string("lineage") {
            let mut guard = self.shared.lock().map_err(|_| {
                crate::backend::BackendError::configuration("state slot poisoned")
            })?;
            if guard.is_none() {
                *guard = Some(StateFile::with_lineage(lineage));
            }
        }
        Ok(())
    }

    fn state(&self) -> BackendResult<Box<dyn StateManager>> {
        Ok(Box::new(InmemStateManager::with_shared(self.shared())))
    }

    fn into_enhanced(self: Box<Self>) -> Result<Box<dyn crate::backend::Enhanced>, Box<dyn Backend>> {
        Err(self)
    }
}
