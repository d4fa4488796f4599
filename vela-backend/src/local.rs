//! Enhanced local backend
//!
//! Persists state in local files and serves operations itself. It doubles
//! as the enhancement wrapper: when it carries an inner backend, state
//! reads and writes are routed through that backend while operations stay
//! local, so the caller always holds an operation-capable handle.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use vela_state::{local::default_backup_path, LocalStateManager, StateManager, DEFAULT_STATE_FILENAME};

use crate::backend::{
    Backend, BackendConfig, BackendResult, Enhanced, Operation, OperationSummary,
};
use crate::prompt::Prompter;

pub struct LocalBackend {
    state_path: PathBuf,
    state_out_path: PathBuf,
    /// `None` disables backups
    backup_path: Option<PathBuf>,
    inner: Option<Box<dyn Backend>>,
    prompter: Option<Arc<dyn Prompter>>,
    validation: bool,
}

impl LocalBackend {
    /// Local backend over the default state file
    pub fn new() -> Self {
        let path = PathBuf::from(DEFAULT_STATE_FILENAME);
        let backup = default_backup_path(&path);
        Self {
            state_path: path.clone(),
            state_out_path: path,
            backup_path: Some(backup),
            inner: None,
            prompter: None,
            validation: true,
        }
    }

    /// Replace the state path triple
    pub fn with_paths(
        mut self,
        state_path: impl Into<PathBuf>,
        state_out_path: impl Into<PathBuf>,
        backup_path: Option<PathBuf>,
    ) -> Self {
        self.state_path = state_path.into();
        self.state_out_path = state_out_path.into();
        self.backup_path = backup_path;
        self
    }

    /// Wrap a non-enhanced backend; its store becomes this backend's store
    pub fn with_inner(mut self, inner: Box<dyn Backend>) -> Self {
        self.inner = Some(inner);
        self
    }

    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn state_path(&self) -> &PathBuf {
        &self.state_path
    }

    fn local_manager(&self) -> LocalStateManager {
        LocalStateManager::with_paths(
            self.state_path.clone(),
            self.state_out_path.clone(),
            self.backup_path.clone(),
        )
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn validate(&self, config: &BackendConfig) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        for (key, value) in &config.attributes {
            match key.as_str() {
                "path" => match value {
                    serde_json::Value::String(s) if !s.is_empty() => {}
                    serde_json::Value::String(_) => {
                        errors.push("attribute \"path\" must not be empty".to_string())
                    }
                    _ => errors.push("attribute \"path\" must be a string".to_string()),
                },
                other => warnings.push(format!("unknown attribute {other:?} is ignored")),
            }
        }

        (warnings, errors)
    }

    async fn configure(&mut self, config: &BackendConfig) -> BackendResult<()> {
        if self.validation {
            let (_, errors) = self.validate(config);
            if !errors.is_empty() {
                return Err(crate::backend::BackendError::configuration(
                    errors.join("; "),
                ));
            }
        }

        if let Some(path) = config.get_string("path") {
            let path = PathBuf::from(path);
            self.backup_path = Some(default_backup_path(&path));
            self.state_out_path = path.clone();
            self.state_path = path;
        }
        Ok(())
    }

    fn state(&self) -> BackendResult<Box<dyn StateManager>> {
        match &self.inner {
            Some(inner) => inner.state(),
            None => Ok(Box::new(self.local_manager())),
        }
    }

    fn into_enhanced(self: Box<Self>) -> Result<Box<dyn Enhanced>, Box<dyn Backend>> {
        Ok(self)
    }
}

#[async_trait]
impl Enhanced for LocalBackend {
    async fn operation(&self, op: Operation) -> BackendResult<OperationSummary> {
        let mut mgr = self.state()?;
        mgr.refresh_state().await?;

        let state = mgr.state();
        let (resources, outputs) = state
            .as_ref()
            .map(|s| {
                (
                    s.modules.iter().map(|m| m.resources.len()).sum(),
                    s.modules.iter().map(|m| m.outputs.len()).sum(),
                )
            })
            .unwrap_or((0, 0));

        Ok(OperationSummary {
            kind: op.kind,
            lineage: state.as_ref().map(|s| s.lineage.clone()),
            serial: state.as_ref().map(|s| s.serial).unwrap_or(0),
            resources,
            outputs,
        })
    }
}
