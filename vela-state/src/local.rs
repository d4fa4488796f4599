//! File-backed state manager
//!
//! Persists atomically by writing a temp file, syncing it, and renaming it
//! over the target. The first persist backs up a non-empty pre-existing
//! target to a sibling file so an overwrite never destroys the only copy.

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::manager::StateManager;
use crate::state::{StateError, StateFile};

/// Build the default backup sibling for an output path
pub fn default_backup_path(out_path: &Path) -> PathBuf {
    let mut name = OsString::from(out_path.as_os_str());
    name.push(crate::meta::DEFAULT_BACKUP_EXTENSION);
    PathBuf::from(name)
}

/// File-backed implementation of [`StateManager`]
#[derive(Debug)]
pub struct LocalStateManager {
    /// Where state is read from
    path: PathBuf,
    /// Where state is written to
    out_path: PathBuf,
    /// Backup sibling for the first overwrite; `None` disables backups
    backup_path: Option<PathBuf>,
    state: Option<StateFile>,
    /// Whether this manager has persisted yet; the backup is taken once,
    /// of the pre-invocation content
    written: bool,
}

impl LocalStateManager {
    /// Manager reading and writing `path`, with the default backup sibling
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let backup = default_backup_path(&path);
        Self::with_paths(path.clone(), path, Some(backup))
    }

    /// Manager with an explicit input/output/backup triple
    pub fn with_paths(
        path: impl Into<PathBuf>,
        out_path: impl Into<PathBuf>,
        backup_path: Option<PathBuf>,
    ) -> Self {
        Self {
            path: path.into(),
            out_path: out_path.into(),
            backup_path,
            state: None,
            written: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn out_path(&self) -> &Path {
        &self.out_path
    }

    /// Copy the pre-existing target aside unless it is absent, empty, or
    /// backups are disabled. Unparseable content is backed up too.
    fn backup_existing(&self) -> Result<(), StateError> {
        let Some(backup_path) = &self.backup_path else {
            return Ok(());
        };

        let existing = match fs::read(&self.out_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(StateError::Read {
                    path: self.out_path.clone(),
                    source: e,
                })
            }
        };

        if let Ok(state) = StateFile::from_slice(&existing) {
            if state.is_empty() {
                return Ok(());
            }
        }

        fs::write(backup_path, &existing).map_err(|e| StateError::Write {
            path: backup_path.clone(),
            source: e,
        })
    }

    fn write_atomic(&self, contents: &[u8]) -> Result<(), StateError> {
        if let Some(parent) = self.out_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| StateError::Write {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let mut tmp_name = OsString::from(self.out_path.as_os_str());
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let write_err = |source| StateError::Write {
            path: tmp_path.clone(),
            source,
        };

        let mut file = fs::File::create(&tmp_path).map_err(write_err)?;
        file.write_all(contents).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);

        fs::rename(&tmp_path, &self.out_path).map_err(|e| StateError::Write {
            path: self.out_path.clone(),
            source: e,
        })
    }
}

#[async_trait]
impl StateManager for LocalStateManager {
    fn state(&self) -> Option<StateFile> {
        self.state.clone()
    }

    fn write_state(&mut self, state: Option<StateFile>) -> Result<(), StateError> {
        self.state = state;
        Ok(())
    }

    async fn refresh_state(&mut self) -> Result<(), StateError> {
        self.state = match fs::read(&self.path) {
            Ok(bytes) => Some(StateFile::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(StateError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        Ok(())
    }

    async fn persist_state(&mut self) -> Result<(), StateError> {
        if !self.written {
            self.backup_existing()?;
            self.written = true;
        }

        match &self.state {
            Some(state) => self.write_atomic(&state.to_vec()?),
            None => match fs::remove_file(&self.out_path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StateError::Write {
                    path: self.out_path.clone(),
                    source: e,
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ResourceState;
    use tempfile::tempdir;

    fn non_empty_state(lineage: &str) -> StateFile {
        let mut state = StateFile::with_lineage(lineage);
        state
            .root_module_mut()
            .resources
            .push(ResourceState::new("s3.bucket", "assets", "aws"));
        state
    }

    #[tokio::test]
    async fn test_refresh_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let mut mgr = LocalStateManager::new(dir.path().join("state.json"));
        mgr.refresh_state().await.unwrap();
        assert!(mgr.state().is_none());
    }

    #[tokio::test]
    async fn test_persist_then_refresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut mgr = LocalStateManager::new(path.clone());
        mgr.write_state(Some(non_empty_state("persist"))).unwrap();
        mgr.persist_state().await.unwrap();

        let mut other = LocalStateManager::new(path.clone());
        other.refresh_state().await.unwrap();
        assert_eq!(other.state().unwrap().lineage, "persist");

        // no backup and no temp file left behind
        assert!(!default_backup_path(&path).exists());
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_first_overwrite_backs_up_non_empty_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, non_empty_state("before").to_vec().unwrap()).unwrap();

        let mut mgr = LocalStateManager::new(path.clone());
        mgr.refresh_state().await.unwrap();
        mgr.write_state(Some(non_empty_state("after"))).unwrap();
        mgr.persist_state().await.unwrap();

        let backup = fs::read(default_backup_path(&path)).unwrap();
        assert_eq!(StateFile::from_slice(&backup).unwrap().lineage, "before");

        // a second persist from the same manager does not rewrite the backup
        mgr.write_state(Some(non_empty_state("again"))).unwrap();
        mgr.persist_state().await.unwrap();
        let backup = fs::read(default_backup_path(&path)).unwrap();
        assert_eq!(StateFile::from_slice(&backup).unwrap().lineage, "before");
    }

    #[tokio::test]
    async fn test_empty_target_is_not_backed_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, StateFile::with_lineage("empty").to_vec().unwrap()).unwrap();

        let mut mgr = LocalStateManager::new(path.clone());
        mgr.write_state(Some(non_empty_state("new"))).unwrap();
        mgr.persist_state().await.unwrap();

        assert!(!default_backup_path(&path).exists());
    }

    #[tokio::test]
    async fn test_disabled_backups() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, non_empty_state("before").to_vec().unwrap()).unwrap();

        let mut mgr = LocalStateManager::with_paths(path.clone(), path.clone(), None);
        mgr.write_state(Some(non_empty_state("after"))).unwrap();
        mgr.persist_state().await.unwrap();

        assert!(!default_backup_path(&path).exists());
    }

    #[tokio::test]
    async fn test_persist_none_deletes_after_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, non_empty_state("doomed").to_vec().unwrap()).unwrap();

        let mut mgr = LocalStateManager::new(path.clone());
        mgr.refresh_state().await.unwrap();
        mgr.write_state(None).unwrap();
        mgr.persist_state().await.unwrap();

        assert!(!path.exists());
        let backup = fs::read(default_backup_path(&path)).unwrap();
        assert_eq!(StateFile::from_slice(&backup).unwrap().lineage, "doomed");
    }

    #[tokio::test]
    async fn test_persist_none_on_missing_file_is_noop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut mgr = LocalStateManager::new(path.clone());
        mgr.write_state(None).unwrap();
        mgr.persist_state().await.unwrap();

        assert!(!path.exists());
        assert!(!default_backup_path(&path).exists());
    }

    #[tokio::test]
    async fn test_separate_in_and_out_paths() {
        let dir = tempdir().unwrap();
        let in_path = dir.path().join("in.json");
        let out_path = dir.path().join("out.json");
        fs::write(&in_path, non_empty_state("input").to_vec().unwrap()).unwrap();

        let mut mgr = LocalStateManager::with_paths(in_path.clone(), out_path.clone(), None);
        mgr.refresh_state().await.unwrap();
        let mut state = mgr.state().unwrap();
        state.increment_serial();
        mgr.write_state(Some(state)).unwrap();
        mgr.persist_state().await.unwrap();

        assert!(out_path.exists());
        let original = fs::read(&in_path).unwrap();
        assert_eq!(StateFile::from_slice(&original).unwrap().serial, 0);
    }
}
