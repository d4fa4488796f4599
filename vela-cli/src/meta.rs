//! Backend resolution
//!
//! Decides which backend a session uses, based on three independent
//! inputs: the backend configuration declared in user files, the backend
//! metadata saved in the data directory, and any legacy remote stanza
//! embedded in the local state file. Every combination maps to exactly one
//! [`Resolution`]; dispatch runs the necessary migrations, persists the
//! metadata, and returns an operation-capable backend.

use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use thiserror::Error;
use tracing::{debug, info, warn};

use vela_backend::legacy::LEGACY_DEPRECATION_WARNING;
use vela_backend::{
    registry, Backend, BackendConfig, BackendError, Enhanced, LocalBackend, PromptError, Prompter,
};
use vela_state::local::default_backup_path;
use vela_state::{
    BackendRecord, LocalStateManager, MetaStore, RemoteRecord, StateError, StateManager,
    DEFAULT_DATA_DIR, DEFAULT_STATE_FILENAME,
};

use crate::config::{self, ConfigError};
use crate::migrate::{migrate_state, MigrateOpts};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(
        "the backend {name:?} could not be found; it is not in the set of supported \
         backends. Check the backend type in your configuration for a typo, or remove \
         the backend block to keep state locally"
    )]
    UnknownBackend { name: String },

    #[error(
        "invalid configuration for backend {name:?}: {}. Update the backend block in \
         your configuration and run the command again",
        .errors.join("; ")
    )]
    Validation { name: String, errors: Vec<String> },

    #[error(
        "error configuring backend {name:?}: {source}. Update the backend block in \
         your configuration and run the command again"
    )]
    Configure {
        name: String,
        #[source]
        source: BackendError,
    },

    #[error("backend {name:?} failed: {source}")]
    Backend {
        name: String,
        #[source]
        source: BackendError,
    },

    #[error("error loading backend configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(
        "error reading {which} state: {source}. The state must be readable to decide \
         whether a migration is necessary; continuing without it would risk losing state"
    )]
    StateRead {
        which: String,
        #[source]
        source: StateError,
    },

    #[error(
        "error migrating state from {one} to {two}: {source}. The source state is \
         intact and unmodified; resolve the error and run the command again"
    )]
    MigrateCopy {
        one: String,
        two: String,
        #[source]
        source: StateError,
    },

    #[error(
        "error saving the backend configuration: {source}. The configured backend \
         already holds your state; run the command again to re-persist the backend \
         metadata"
    )]
    SaveMetadata {
        #[source]
        source: StateError,
    },

    #[error(
        "interactive input is required to resolve the backend but input is disabled. \
         Re-run with input enabled, or align your configuration with the saved backend"
    )]
    InputRequired,

    #[error("prompt failed: {0}")]
    Prompt(PromptError),

    #[error(
        "the local state carries a legacy remote stanza and a backend is saved in the \
         metadata, but no backend is declared in the configuration. Vela never writes \
         this combination; repair the state or metadata file manually, then run the \
         command again"
    )]
    ImpossibleCombination,
}

impl From<PromptError> for SetupError {
    fn from(e: PromptError) -> Self {
        match e {
            PromptError::Disabled => SetupError::InputRequired,
            other => SetupError::Prompt(other),
        }
    }
}

/// Options for one backend resolution
#[derive(Debug, Default)]
pub struct BackendOpts {
    /// Where to look for the backend configuration; `None` searches the
    /// current directory
    pub config_path: Option<PathBuf>,
    /// Skip resolution entirely and return a purely local backend
    pub force_local: bool,
}

/// Outcome of classifying the `(config, remote, saved)` triple.
///
/// The match in [`classify`] is total: removing a case is a compile error,
/// not a silently dropped branch.
#[derive(Debug)]
pub enum Resolution {
    /// Nothing configured anywhere: pure local state
    PureLocal,
    /// A backend is saved but no longer declared: unset it
    Unset { saved: BackendRecord },
    /// Only a legacy remote stanza exists
    LegacyOnly { remote: RemoteRecord },
    /// Saved backend and legacy remote without any declared config
    Impossible,
    /// A backend is declared for the first time
    ConfigureNew { config: BackendConfig },
    /// Declared and saved configurations match
    Unchanged {
        config: BackendConfig,
        saved: BackendRecord,
    },
    /// Declared configuration differs from the saved one
    Changed {
        config: BackendConfig,
        saved: BackendRecord,
    },
    /// First-time configuration with a legacy remote present
    ConfigureNewWithLegacy {
        config: BackendConfig,
        remote: RemoteRecord,
    },
    /// Legacy remote beside an unchanged saved backend
    UnchangedWithLegacy {
        config: BackendConfig,
        saved: BackendRecord,
        remote: RemoteRecord,
    },
    /// All three inputs present and the configuration changed
    ChangedWithLegacy {
        config: BackendConfig,
        saved: BackendRecord,
        remote: RemoteRecord,
    },
}

/// Total classification of the three resolution inputs
pub fn classify(
    config: Option<BackendConfig>,
    remote: Option<RemoteRecord>,
    saved: Option<BackendRecord>,
) -> Resolution {
    match (config, remote, saved) {
        (None, None, None) => Resolution::PureLocal,
        (None, None, Some(saved)) => Resolution::Unset { saved },
        (None, Some(remote), None) => Resolution::LegacyOnly { remote },
        (None, Some(_), Some(_)) => Resolution::Impossible,
        (Some(config), None, None) => Resolution::ConfigureNew { config },
        (Some(config), None, Some(saved)) => {
            if saved.hash == config.hash {
                Resolution::Unchanged { config, saved }
            } else {
                Resolution::Changed { config, saved }
            }
        }
        (Some(config), Some(remote), None) => {
            Resolution::ConfigureNewWithLegacy { config, remote }
        }
        (Some(config), Some(remote), Some(saved)) => {
            if saved.hash == config.hash {
                Resolution::UnchangedWithLegacy {
                    config,
                    saved,
                    remote,
                }
            } else {
                Resolution::ChangedWithLegacy {
                    config,
                    saved,
                    remote,
                }
            }
        }
    }
}

/// Per-invocation setup context: state paths, data directory, prompter,
/// and any command-line backend overrides
pub struct Session {
    /// Where state is read from; defaults to the standard file name
    pub state_path: Option<PathBuf>,
    /// Where state is written; defaults to `state_path`
    pub state_out_path: Option<PathBuf>,
    /// Backup sibling; defaults next to the output path, `-` disables
    pub backup_path: Option<PathBuf>,
    /// Tool-private directory holding the backend metadata
    pub data_dir: PathBuf,
    /// `-backend <type>` override; takes priority over the file loader
    pub backend_type_override: Option<String>,
    /// `-backend-config k=v` pairs accompanying the override
    pub backend_config_overrides: Vec<String>,
    pub prompter: Arc<dyn Prompter>,
}

impl Session {
    pub fn new(prompter: Arc<dyn Prompter>) -> Self {
        Self {
            state_path: None,
            state_out_path: None,
            backup_path: None,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            backend_type_override: None,
            backend_config_overrides: Vec::new(),
            prompter,
        }
    }

    /// Resolve, migrate if needed, and return the backend for this
    /// session. The result is always operation-capable: a non-enhanced
    /// resolution is wrapped in the local backend.
    pub async fn backend(&self, opts: BackendOpts) -> Result<Box<dyn Enhanced>, SetupError> {
        let mut resolved: Option<Box<dyn Backend>> = None;

        if !opts.force_local {
            let config = self.backend_config(&opts)?;
            let mut meta = MetaStore::open(&self.data_dir);
            meta.refresh()
                .await
                .map_err(|source| SetupError::StateRead {
                    which: "backend metadata".to_string(),
                    source,
                })?;
            resolved = self.backend_from_config(config, &mut meta).await?;
        }

        match resolved {
            Some(backend) => match backend.into_enhanced() {
                Ok(enhanced) => {
                    info!("backend initialized");
                    Ok(enhanced)
                }
                Err(plain) => {
                    info!("backend is not operation-capable, wrapping in local");
                    Ok(Box::new(self.local_wrapper().with_inner(plain)))
                }
            },
            None => {
                info!("no backend configured, using local");
                Ok(Box::new(self.local_wrapper()))
            }
        }
    }

    /// The effective state path triple after applying the defaulting rules
    fn state_paths(&self) -> (PathBuf, PathBuf, Option<PathBuf>) {
        let state_path = self
            .state_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILENAME));
        let out_path = self.state_out_path.clone().unwrap_or_else(|| state_path.clone());
        let backup_path = match &self.backup_path {
            Some(path) if path.as_os_str() == "-" => None,
            Some(path) => Some(path.clone()),
            None => Some(default_backup_path(&out_path)),
        };
        (state_path, out_path, backup_path)
    }

    fn local_wrapper(&self) -> LocalBackend {
        let (state_path, out_path, backup_path) = self.state_paths();
        LocalBackend::new()
            .with_paths(state_path, out_path, backup_path)
            .with_prompter(Arc::clone(&self.prompter))
    }

    fn local_manager(&self) -> LocalStateManager {
        let (state_path, out_path, backup_path) = self.state_paths();
        LocalStateManager::with_paths(state_path, out_path, backup_path)
    }

    fn backend_config(&self, opts: &BackendOpts) -> Result<Option<BackendConfig>, SetupError> {
        if let Some(backend_type) = &self.backend_type_override {
            let config =
                config::config_from_overrides(backend_type, &self.backend_config_overrides)?;
            return Ok(Some(config));
        }
        Ok(config::load_backend_config(opts.config_path.as_deref())?)
    }

    /// The decision machine: classify the three inputs and dispatch.
    /// Returns `None` when the caller should use pure local state.
    async fn backend_from_config(
        &self,
        config: Option<BackendConfig>,
        meta: &mut MetaStore,
    ) -> Result<Option<Box<dyn Backend>>, SetupError> {
        let mut local = self.local_manager();
        local
            .refresh_state()
            .await
            .map_err(|source| SetupError::StateRead {
                which: "local".to_string(),
                source,
            })?;

        let remote = local
            .state()
            .and_then(|s| s.remote)
            .filter(|r| !r.remote_type.is_empty());
        let saved = meta
            .saved_backend()
            .filter(|b| !b.backend_type.is_empty());

        debug!(
            config = config.is_some(),
            remote = remote.is_some(),
            saved = saved.is_some(),
            "classifying backend inputs"
        );

        match classify(config, remote, saved) {
            Resolution::PureLocal => Ok(None),
            Resolution::Unset { saved } => self.unset_saved(saved, &mut local, meta).await,
            Resolution::LegacyOnly { remote } => self.legacy_only(remote).await,
            Resolution::Impossible => Err(SetupError::ImpossibleCombination),
            Resolution::ConfigureNew { config } => {
                self.configure_new(config, &mut local, meta).await
            }
            Resolution::Unchanged { saved, .. } => self.use_saved(saved).await,
            Resolution::Changed { config, saved } => self.change_saved(config, saved, meta).await,
            Resolution::ConfigureNewWithLegacy { config, remote } => {
                self.configure_new_with_legacy(config, remote, &mut local, meta)
                    .await
            }
            Resolution::UnchangedWithLegacy { saved, remote, .. } => {
                self.unchanged_with_legacy(saved, remote).await
            }
            Resolution::ChangedWithLegacy {
                config,
                saved,
                remote,
            } => {
                self.change_with_legacy(config, saved, remote, meta)
                    .await
            }
        }
    }

    //--------------------------------------------------------------------
    // Resolution branches
    //--------------------------------------------------------------------

    /// A backend is saved but the configuration no longer declares one:
    /// offer to move its state back into the local file, then clear the
    /// metadata either way.
    async fn unset_saved(
        &self,
        saved: BackendRecord,
        local: &mut LocalStateManager,
        meta: &mut MetaStore,
    ) -> Result<Option<Box<dyn Backend>>, SetupError> {
        debug!(backend = %saved.backend_type, "unsetting saved backend");
        let backend = self.saved_backend_instance(&saved).await?;
        let mut one = self.backend_state(backend.as_ref(), &saved.backend_type)?;

        migrate_state(
            MigrateOpts {
                one_type: &saved.backend_type,
                two_type: "local",
                one: one.as_mut(),
                two: local,
            },
            self.prompter.as_ref(),
        )
        .await?;

        meta.save(None)
            .await
            .map_err(|source| SetupError::SaveMetadata { source })?;
        Ok(None)
    }

    /// Only the legacy remote stanza exists: keep serving it, with a
    /// deprecation warning and no metadata write.
    async fn legacy_only(
        &self,
        remote: RemoteRecord,
    ) -> Result<Option<Box<dyn Backend>>, SetupError> {
        self.warn_legacy();
        let backend = self.legacy_backend_instance(&remote).await?;
        Ok(Some(backend))
    }

    /// First-time backend configuration: offer to move a non-empty local
    /// state over, clear the local file if the question was raised, and
    /// persist the metadata.
    async fn configure_new(
        &self,
        config: BackendConfig,
        local: &mut LocalStateManager,
        meta: &mut MetaStore,
    ) -> Result<Option<Box<dyn Backend>>, SetupError> {
        debug!(backend = %config.backend_type, "configuring backend for the first time");
        let backend = self.new_configured_backend(&config).await?;

        if local.state().is_some_and(|s| !s.is_empty()) {
            let mut two = self.backend_state(backend.as_ref(), &config.backend_type)?;
            migrate_state(
                MigrateOpts {
                    one_type: "local",
                    two_type: &config.backend_type,
                    one: local,
                    two: two.as_mut(),
                },
                self.prompter.as_ref(),
            )
            .await?;
            self.clear_local(local).await;
        }

        meta.save(Some(config.to_record()))
            .await
            .map_err(|source| SetupError::SaveMetadata { source })?;
        Ok(Some(backend))
    }

    /// Saved configuration matches the declared one: instantiate from the
    /// saved record, which holds the complete configuration, and touch
    /// nothing on disk.
    async fn use_saved(
        &self,
        saved: BackendRecord,
    ) -> Result<Option<Box<dyn Backend>>, SetupError> {
        debug!(backend = %saved.backend_type, "saved backend configuration unchanged");
        Ok(Some(self.saved_backend_instance(&saved).await?))
    }

    /// The declared configuration differs from the saved one: offer a
    /// migration from the old backend to the new, then save the new
    /// configuration.
    async fn change_saved(
        &self,
        config: BackendConfig,
        saved: BackendRecord,
        meta: &mut MetaStore,
    ) -> Result<Option<Box<dyn Backend>>, SetupError> {
        debug!(
            old = %saved.backend_type,
            new = %config.backend_type,
            "backend configuration changed"
        );
        let old = self.saved_backend_instance(&saved).await?;
        let new = self.new_configured_backend(&config).await?;

        let mut one = self.backend_state(old.as_ref(), &saved.backend_type)?;
        let mut two = self.backend_state(new.as_ref(), &config.backend_type)?;
        migrate_state(
            MigrateOpts {
                one_type: &saved.backend_type,
                two_type: &config.backend_type,
                one: one.as_mut(),
                two: two.as_mut(),
            },
            self.prompter.as_ref(),
        )
        .await?;

        meta.save(Some(config.to_record()))
            .await
            .map_err(|source| SetupError::SaveMetadata { source })?;
        Ok(Some(new))
    }

    /// First-time configuration while a legacy remote exists: offer the
    /// legacy migration first (independently of the local state), then
    /// handle the local state as in a plain first-time configuration, and
    /// clear the legacy stanza once everything is durable.
    async fn configure_new_with_legacy(
        &self,
        config: BackendConfig,
        remote: RemoteRecord,
        local: &mut LocalStateManager,
        meta: &mut MetaStore,
    ) -> Result<Option<Box<dyn Backend>>, SetupError> {
        self.warn_legacy();
        let backend = self.new_configured_backend(&config).await?;
        let legacy = self.legacy_backend_instance(&remote).await?;

        {
            let mut one = self.backend_state(legacy.as_ref(), &remote.remote_type)?;
            let mut two = self.backend_state(backend.as_ref(), &config.backend_type)?;
            migrate_state(
                MigrateOpts {
                    one_type: &remote.remote_type,
                    two_type: &config.backend_type,
                    one: one.as_mut(),
                    two: two.as_mut(),
                },
                self.prompter.as_ref(),
            )
            .await?;
        }

        if local.state().is_some_and(|s| !s.is_empty()) {
            let mut two = self.backend_state(backend.as_ref(), &config.backend_type)?;
            migrate_state(
                MigrateOpts {
                    one_type: "local",
                    two_type: &config.backend_type,
                    one: local,
                    two: two.as_mut(),
                },
                self.prompter.as_ref(),
            )
            .await?;
            self.clear_local(local).await;
        }

        meta.save(Some(config.to_record()))
            .await
            .map_err(|source| SetupError::SaveMetadata { source })?;
        self.clear_legacy().await;
        Ok(Some(backend))
    }

    /// Legacy remote beside an unchanged saved backend: offer the legacy
    /// migration into the saved backend and clear the stanza; the
    /// metadata stays as it is.
    async fn unchanged_with_legacy(
        &self,
        saved: BackendRecord,
        remote: RemoteRecord,
    ) -> Result<Option<Box<dyn Backend>>, SetupError> {
        self.warn_legacy();
        let backend = self.saved_backend_instance(&saved).await?;
        let legacy = self.legacy_backend_instance(&remote).await?;

        let mut one = self.backend_state(legacy.as_ref(), &remote.remote_type)?;
        let mut two = self.backend_state(backend.as_ref(), &saved.backend_type)?;
        migrate_state(
            MigrateOpts {
                one_type: &remote.remote_type,
                two_type: &saved.backend_type,
                one: one.as_mut(),
                two: two.as_mut(),
            },
            self.prompter.as_ref(),
        )
        .await?;

        self.clear_legacy().await;
        Ok(Some(backend))
    }

    /// All three inputs present and the configuration changed. The saved
    /// backend's state is offered first, then the legacy state; a later
    /// accepted copy overwrites an earlier one after its own
    /// confirmation round.
    async fn change_with_legacy(
        &self,
        config: BackendConfig,
        saved: BackendRecord,
        remote: RemoteRecord,
        meta: &mut MetaStore,
    ) -> Result<Option<Box<dyn Backend>>, SetupError> {
        self.warn_legacy();
        let new = self.new_configured_backend(&config).await?;
        let old = self.saved_backend_instance(&saved).await?;
        let legacy = self.legacy_backend_instance(&remote).await?;

        {
            let mut one = self.backend_state(old.as_ref(), &saved.backend_type)?;
            let mut two = self.backend_state(new.as_ref(), &config.backend_type)?;
            migrate_state(
                MigrateOpts {
                    one_type: &saved.backend_type,
                    two_type: &config.backend_type,
                    one: one.as_mut(),
                    two: two.as_mut(),
                },
                self.prompter.as_ref(),
            )
            .await?;
        }
        {
            let mut one = self.backend_state(legacy.as_ref(), &remote.remote_type)?;
            let mut two = self.backend_state(new.as_ref(), &config.backend_type)?;
            migrate_state(
                MigrateOpts {
                    one_type: &remote.remote_type,
                    two_type: &config.backend_type,
                    one: one.as_mut(),
                    two: two.as_mut(),
                },
                self.prompter.as_ref(),
            )
            .await?;
        }

        meta.save(Some(config.to_record()))
            .await
            .map_err(|source| SetupError::SaveMetadata { source })?;
        self.clear_legacy().await;
        Ok(Some(new))
    }

    //--------------------------------------------------------------------
    // Shared plumbing
    //--------------------------------------------------------------------

    fn instantiate(&self, name: &str) -> Result<Box<dyn Backend>, SetupError> {
        registry()
            .create(name)
            .ok_or_else(|| SetupError::UnknownBackend {
                name: name.to_string(),
            })
    }

    /// Instantiate, validate, and configure a backend from a declared
    /// configuration
    async fn new_configured_backend(
        &self,
        config: &BackendConfig,
    ) -> Result<Box<dyn Backend>, SetupError> {
        let mut backend = self.instantiate(&config.backend_type)?;

        let (warnings, errors) = backend.validate(config);
        for warning in &warnings {
            warn!(backend = %config.backend_type, "{warning}");
        }
        if !errors.is_empty() {
            return Err(SetupError::Validation {
                name: config.backend_type.clone(),
                errors,
            });
        }

        backend
            .configure(config)
            .await
            .map_err(|source| SetupError::Configure {
                name: config.backend_type.clone(),
                source,
            })?;
        Ok(backend)
    }

    /// Instantiate and configure from a saved record, which carries the
    /// complete configuration and needs no validation round.
    async fn saved_backend_instance(
        &self,
        saved: &BackendRecord,
    ) -> Result<Box<dyn Backend>, SetupError> {
        let config = BackendConfig::from_record(saved);
        let mut backend = self.instantiate(&saved.backend_type)?;
        backend
            .configure(&config)
            .await
            .map_err(|source| SetupError::Configure {
                name: saved.backend_type.clone(),
                source,
            })?;
        Ok(backend)
    }

    async fn legacy_backend_instance(
        &self,
        remote: &RemoteRecord,
    ) -> Result<Box<dyn Backend>, SetupError> {
        let config = BackendConfig::from_remote_record(remote);
        let mut backend = self.instantiate(&remote.remote_type)?;
        backend
            .configure(&config)
            .await
            .map_err(|source| SetupError::Configure {
                name: remote.remote_type.clone(),
                source,
            })?;
        Ok(backend)
    }

    fn backend_state(
        &self,
        backend: &dyn Backend,
        name: &str,
    ) -> Result<Box<dyn StateManager>, SetupError> {
        backend.state().map_err(|source| SetupError::Backend {
            name: name.to_string(),
            source,
        })
    }

    /// Delete the migrated local state (writing the backup sibling first).
    /// The copy is already durable, so a failure here only warrants a
    /// warning and manual cleanup.
    async fn clear_local(&self, local: &mut LocalStateManager) {
        let result = match local.write_state(None) {
            Ok(()) => local.persist_state().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("failed to clear migrated local state: {e}");
            eprintln!(
                "{}",
                format!(
                    "Warning: the local state was copied but could not be removed ({e}). \
                     Remove {} manually to finish the migration.",
                    local.out_path().display()
                )
                .yellow()
            );
        }
    }

    /// Drop the legacy remote stanza from the local state file. Runs only
    /// after the replacement backend is durable; a failure is demoted to a
    /// warning for the same reason as [`Self::clear_local`].
    async fn clear_legacy(&self) {
        let (state_path, out_path, _) = self.state_paths();
        let mut mgr = LocalStateManager::with_paths(state_path, out_path, None);

        let result = async {
            mgr.refresh_state().await?;
            if let Some(mut doc) = mgr.state() {
                if doc.remote.take().is_some() {
                    let next = if doc.is_empty() && doc.backend.is_none() {
                        None
                    } else {
                        Some(doc)
                    };
                    mgr.write_state(next)?;
                    mgr.persist_state().await?;
                }
            }
            Ok::<(), StateError>(())
        }
        .await;

        if let Err(e) = result {
            warn!("failed to clear legacy remote stanza: {e}");
            eprintln!(
                "{}",
                format!(
                    "Warning: the legacy remote stanza could not be cleared ({e}). \
                     Remove the \"remote\" block from the state file manually."
                )
                .yellow()
            );
        }
    }

    fn warn_legacy(&self) {
        warn!("legacy remote state configuration detected");
        eprintln!("{}", LEGACY_DEPRECATION_WARNING.yellow());
    }
}
