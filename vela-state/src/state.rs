//! State file structures for persisting infrastructure state

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while reading, writing, or persisting state documents
#[derive(Debug, Error)]
pub enum StateError {
    /// Reading a state file from its source failed
    #[error("failed to read state from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing a state file to its destination failed
    #[error("failed to write state to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state file content could not be decoded
    #[error("invalid state file: {0}")]
    Invalid(String),

    /// The state document could not be encoded
    #[error("failed to serialize state: {0}")]
    Serialize(String),

    /// A remote store failed to serve or accept a state document
    #[error("remote state operation failed: {0}")]
    Remote(String),
}

/// The main state document persisted by every backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,
    /// Monotonically increasing number for each state modification
    pub serial: u64,
    /// Unique identifier for this state lineage, stable across writes of
    /// the same logical state
    pub lineage: String,
    /// Legacy remote state stanza, if this state is served by the old
    /// remote mechanism
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteRecord>,
    /// Last-used backend configuration; only carried by the metadata file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendRecord>,
    /// All modules and their resources
    #[serde(default)]
    pub modules: Vec<ModuleState>,
}

impl StateFile {
    /// Current state file format version
    pub const CURRENT_VERSION: u32 = 1;

    /// Create a new empty state document with a fresh lineage
    pub fn new() -> Self {
        Self::with_lineage(uuid::Uuid::new_v4().to_string())
    }

    /// Create a new state document with a specific lineage
    pub fn with_lineage(lineage: impl Into<String>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage: lineage.into(),
            remote: None,
            backend: None,
            modules: Vec::new(),
        }
    }

    /// True when no module holds resources and no outputs are recorded.
    ///
    /// The embedded remote/backend stanzas do not count: a document that
    /// only carries plumbing records is still empty.
    pub fn is_empty(&self) -> bool {
        self.modules
            .iter()
            .all(|m| m.resources.is_empty() && m.outputs.is_empty())
    }

    /// Increment the serial for a new write of the same lineage
    pub fn increment_serial(&mut self) {
        self.serial += 1;
    }

    /// The root module, created on demand
    pub fn root_module_mut(&mut self) -> &mut ModuleState {
        if self.modules.is_empty() {
            self.modules.push(ModuleState::root());
        }
        &mut self.modules[0]
    }

    /// Decode a state document from JSON bytes
    pub fn from_slice(data: &[u8]) -> Result<Self, StateError> {
        serde_json::from_slice(data).map_err(|e| StateError::Invalid(e.to_string()))
    }

    /// Encode a state document as pretty JSON bytes
    pub fn to_vec(&self) -> Result<Vec<u8>, StateError> {
        serde_json::to_vec_pretty(self).map_err(|e| StateError::Serialize(e.to_string()))
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

/// One module of the state tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleState {
    /// Module path; the root module is `["root"]`
    pub path: Vec<String>,
    /// Output values recorded by the last operation
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    /// All managed resources in this module
    #[serde(default)]
    pub resources: Vec<ResourceState>,
}

impl ModuleState {
    /// Create an empty root module
    pub fn root() -> Self {
        Self {
            path: vec!["root".to_string()],
            outputs: BTreeMap::new(),
            resources: Vec::new(),
        }
    }
}

/// State of a single managed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource type (e.g., "s3.bucket")
    pub resource_type: String,
    /// Resource name from the configuration
    pub name: String,
    /// Provider name (e.g., "aws")
    pub provider: String,
    /// All attributes of the resource as JSON values
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl ResourceState {
    pub fn new(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            provider: provider.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Legacy remote state stanza embedded in a state document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Remote type name (e.g., "http", "consul", "atlas")
    #[serde(rename = "type")]
    pub remote_type: String,
    /// Remote client configuration
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// Saved backend configuration stanza carried by the metadata file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendRecord {
    /// Backend type name
    #[serde(rename = "type")]
    pub backend_type: String,
    /// Complete backend configuration as last configured
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    /// Digest of the configuration used for change detection
    pub hash: u64,
}
