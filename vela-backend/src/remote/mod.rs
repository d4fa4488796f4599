//! Legacy remote state clients
//!
//! The older remote-state mechanism stores a state document in a remote
//! service behind a minimal get/put/delete protocol. Each typed client
//! implements [`RemoteClient`]; [`RemoteStateManager`] adapts a client to
//! the uniform [`StateManager`] interface.

mod atlas;
mod consul;
mod http;

pub use atlas::AtlasClient;
pub use consul::ConsulClient;
pub use http::HttpClient;

use std::sync::Arc;

use async_trait::async_trait;

use vela_state::{StateError, StateFile, StateManager};

use crate::backend::BackendResult;

/// Minimal wire protocol of a legacy remote state store
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetch the current document. `None` when the store holds no state.
    async fn get(&self) -> BackendResult<Option<Vec<u8>>>;

    /// Replace the stored document
    async fn put(&self, data: &[u8]) -> BackendResult<()>;

    /// Remove the stored document
    async fn delete(&self) -> BackendResult<()>;
}

/// State manager over a [`RemoteClient`]
pub struct RemoteStateManager {
    client: Arc<dyn RemoteClient>,
    state: Option<StateFile>,
}

impl RemoteStateManager {
    pub fn new(client: Arc<dyn RemoteClient>) -> Self {
        Self {
            client,
            state: None,
        }
    }
}

#[async_trait]
impl StateManager for RemoteStateManager {
    fn state(&self) -> Option<StateFile> {
        self.state.clone()
    }

    fn write_state(&mut self, state: Option<StateFile>) -> Result<(), StateError> {
        self.state = state;
        Ok(())
    }

    async fn refresh_state(&mut self) -> Result<(), StateError> {
        let payload = self
            .client
            .get()
            .await
            .map_err(|e| StateError::Remote(e.to_string()))?;
        self.state = match payload {
            Some(bytes) => Some(StateFile::from_slice(&bytes)?),
            None => None,
        };
        Ok(())
    }

    async fn persist_state(&mut self) -> Result<(), StateError> {
        match &self.state {
            Some(state) => {
                let bytes = state.to_vec()?;
                self.client
                    .put(&bytes)
                    .await
                    .map_err(|e| StateError::Remote(e.to_string()))
            }
            None => self
                .client
                .delete()
                .await
                .map_err(|e| StateError::Remote(e.to_string())),
        }
    }
}
