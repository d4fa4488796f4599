//! Legacy remote backend adapter
//!
//! Serves the older typed-remote protocol behind the regular backend
//! contract. The adapter is registered under the remote type names, so the
//! registry can produce one for any `remote` stanza found in a state file.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use vela_state::StateManager;

use crate::backend::{Backend, BackendConfig, BackendError, BackendResult};
use crate::remote::{AtlasClient, ConsulClient, HttpClient, RemoteClient, RemoteStateManager};

/// Remote type names served by the adapter
pub const LEGACY_REMOTE_TYPES: &[&str] = &["atlas", "consul", "http"];

/// Warning shown whenever a legacy remote configuration is still in use
pub const LEGACY_DEPRECATION_WARNING: &str = "\
Deprecation warning: this working directory is configured to use legacy \
remote state, which will be removed in a future release. Please migrate to \
a 'backend' block in your configuration; until then the existing remote \
settings continue to work.";

fn required_keys(remote_type: &str) -> &'static [&'static str] {
    match remote_type {
        "atlas" => &["address", "name"],
        "consul" => &["path"],
        "http" => &["address"],
        _ => &[],
    }
}

/// Backend adapter over a legacy remote client
pub struct LegacyBackend {
    remote_type: String,
    client: Option<Arc<dyn RemoteClient>>,
}

impl LegacyBackend {
    pub fn new(remote_type: impl Into<String>) -> Self {
        Self {
            remote_type: remote_type.into(),
            client: None,
        }
    }

    pub fn remote_type(&self) -> &str {
        &self.remote_type
    }

    /// Legacy remote configuration is a string map; reject anything else.
    fn string_config(
        &self,
        config: &BackendConfig,
    ) -> BackendResult<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for (key, value) in &config.attributes {
            match value {
                serde_json::Value::String(s) => {
                    out.insert(key.clone(), s.clone());
                }
                other => {
                    return Err(BackendError::configuration(format!(
                        "legacy remote attribute {key:?} must be a string, got {other}"
                    )))
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Backend for LegacyBackend {
    fn validate(&self, config: &BackendConfig) -> (Vec<String>, Vec<String>) {
        let mut errors = Vec::new();

        if !LEGACY_REMOTE_TYPES.contains(&self.remote_type.as_str()) {
            errors.push(format!("unknown legacy remote type {:?}", self.remote_type));
        }

        for key in required_keys(&self.remote_type) {
            match config.attributes.get(*key) {
                Some(serde_json::Value::String(s)) if !s.is_empty() => {}
                Some(serde_json::Value::String(_)) | None => {
                    errors.push(format!("missing required attribute {key:?}"))
                }
                Some(_) => errors.push(format!("attribute {key:?} must be a string")),
            }
        }

        (Vec::new(), errors)
    }

    async fn configure(&mut self, config: &BackendConfig) -> BackendResult<()> {
        let attrs = self.string_config(config)?;
        let client: Arc<dyn RemoteClient> = match self.remote_type.as_str() {
            "atlas" => Arc::new(AtlasClient::from_config(&attrs)?),
            "consul" => Arc::new(ConsulClient::from_config(&attrs)?),
            "http" => Arc::new(HttpClient::from_config(&attrs)?),
            other => return Err(BackendError::unsupported(other)),
        };
        self.client = Some(client);
        Ok(())
    }

    fn state(&self) -> BackendResult<Box<dyn StateManager>> {
        let client = self.client.as_ref().ok_or_else(|| {
            BackendError::configuration(format!(
                "legacy remote backend {:?} has not been configured",
                self.remote_type
            ))
        })?;
        Ok(Box::new(RemoteStateManager::new(Arc::clone(client))))
    }

    fn into_enhanced(self: Box<Self>) -> Result<Box<dyn crate::backend::Enhanced>, Box<dyn Backend>> {
        Err(self)
    }
}
