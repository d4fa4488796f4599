//! Persisted backend metadata store
//!
//! A specialized state file kept in the tool's data directory. It carries
//! no resources; its `backend` stanza records the last-used backend
//! configuration. Backups are disabled for this file.

use std::path::{Path, PathBuf};

use crate::local::LocalStateManager;
use crate::manager::StateManager;
use crate::state::{BackendRecord, StateError, StateFile};

/// Default local state file name
pub const DEFAULT_STATE_FILENAME: &str = "vela.state.json";

/// Extension appended to an output path to form its backup sibling
pub const DEFAULT_BACKUP_EXTENSION: &str = ".backup";

/// Tool-private directory adjacent to the working directory
pub const DEFAULT_DATA_DIR: &str = ".vela";

/// Store for the persisted backend metadata file
pub struct MetaStore {
    mgr: LocalStateManager,
}

impl MetaStore {
    /// Open the metadata store under `data_dir`. The file may not exist,
    /// which means no backend has been saved.
    pub fn open(data_dir: impl AsRef<Path>) -> Self {
        let path = Self::file_path(data_dir);
        Self {
            mgr: LocalStateManager::with_paths(path.clone(), path, None),
        }
    }

    /// Path of the metadata file under `data_dir`
    pub fn file_path(data_dir: impl AsRef<Path>) -> PathBuf {
        data_dir.as_ref().join(DEFAULT_STATE_FILENAME)
    }

    pub async fn refresh(&mut self) -> Result<(), StateError> {
        self.mgr.refresh_state().await
    }

    /// The saved backend record, if any
    pub fn saved_backend(&self) -> Option<BackendRecord> {
        self.mgr.state().and_then(|s| s.backend)
    }

    /// Replace the saved backend record and persist. Clearing the record
    /// removes the file once nothing but an empty document remains.
    pub async fn save(&mut self, record: Option<BackendRecord>) -> Result<(), StateError> {
        let next = match (self.mgr.state(), record) {
            (_, None) => None,
            (Some(mut state), Some(record)) => {
                state.backend = Some(record);
                Some(state)
            }
            (None, Some(record)) => {
                let mut state = StateFile::new();
                state.backend = Some(record);
                Some(state)
            }
        };

        self.mgr.write_state(next)?;
        self.mgr.persist_state().await
    }
}
