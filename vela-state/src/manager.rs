//! State manager abstraction

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::state::{StateError, StateFile};

/// Uniform handle over a persistent state store.
///
/// `state` and `write_state` operate on the in-memory view only;
/// `refresh_state` must be called before trusting the content and
/// `persist_state` makes the in-memory view durable.
#[async_trait]
pub trait StateManager: Send {
    /// Current in-memory view of the state. `None` means no document.
    fn state(&self) -> Option<StateFile>;

    /// Replace the in-memory view. `None` marks the document for removal
    /// at the next persist.
    fn write_state(&mut self, state: Option<StateFile>) -> Result<(), StateError>;

    /// Re-read the state from its source of truth.
    async fn refresh_state(&mut self) -> Result<(), StateError>;

    /// Durably write the in-memory view to the source of truth.
    async fn persist_state(&mut self) -> Result<(), StateError>;
}

/// In-memory state manager backed by a shared slot.
///
/// Managers cloned from the same slot observe each other's persisted
/// writes, which is what a backend needs to hand out fresh managers over
/// one logical store.
#[derive(Debug, Clone, Default)]
pub struct InmemStateManager {
    shared: Arc<Mutex<Option<StateFile>>>,
    current: Option<StateFile>,
}

impl InmemStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager over an existing shared slot
    pub fn with_shared(shared: Arc<Mutex<Option<StateFile>>>) -> Self {
        Self {
            shared,
            current: None,
        }
    }

    /// The shared slot backing this manager
    pub fn shared(&self) -> Arc<Mutex<Option<StateFile>>> {
        Arc::clone(&self.shared)
    }
}

#[async_trait]
impl StateManager for InmemStateManager {
    fn state(&self) -> Option<StateFile> {
        self.current.clone()
    }

    fn write_state(&mut self, state: Option<StateFile>) -> Result<(), StateError> {
        self.current = state;
        Ok(())
    }

    async fn refresh_state(&mut self) -> Result<(), StateError> {
        let guard = self
            .shared
            .lock()
            .map_err(|_| StateError::Remote("state slot poisoned".to_string()))?;
        self.current = guard.clone();
        Ok(())
    }

    async fn persist_state(&mut self) -> Result<(), StateError> {
        let mut guard = self
            .shared
            .lock()
            .map_err(|_| StateError::Remote("state slot poisoned".to_string()))?;
        *guard = self.current.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmem_round_trip() {
        let mut mgr = InmemStateManager::new();
        assert!(mgr.state().is_none());

        let state = StateFile::with_lineage("inmem");
        mgr.write_state(Some(state.clone())).unwrap();
        mgr.persist_state().await.unwrap();

        let mut other = InmemStateManager::with_shared(mgr.shared());
        other.refresh_state().await.unwrap();
        assert_eq!(other.state().unwrap().lineage, "inmem");
    }

    #[tokio::test]
    async fn test_inmem_write_is_not_visible_until_persist() {
        let mut mgr = InmemStateManager::new();
        mgr.write_state(Some(StateFile::with_lineage("pending")))
            .unwrap();

        let mut other = InmemStateManager::with_shared(mgr.shared());
        other.refresh_state().await.unwrap();
        assert!(other.state().is_none());
    }
}
