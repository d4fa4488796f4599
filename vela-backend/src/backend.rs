//! Backend contract and configuration types

use std::collections::BTreeMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

use vela_state::{BackendRecord, RemoteRecord, StateError, StateManager};

/// Errors that can occur when interacting with a backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend type is not supported
    #[error("unsupported backend type: {0}")]
    Unsupported(String),

    /// Configuration error
    #[error("backend configuration error: {0}")]
    Configuration(String),

    /// Network or I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A remote endpoint answered with an unexpected status
    #[error("HTTP error: {0}")]
    Http(String),

    /// Underlying state store failure
    #[error(transparent)]
    State(#[from] StateError),
}

impl BackendError {
    pub fn unsupported(backend_type: impl Into<String>) -> Self {
        Self::Unsupported(backend_type.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Configuration for a backend, as declared by the user or recorded in the
/// persisted backend metadata
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    /// Backend type (e.g., "local", "inmem", "http")
    pub backend_type: String,
    /// Backend-specific attributes; ordered so the hash is deterministic
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Digest over `(type, attributes)` used solely for change detection
    pub hash: u64,
}

impl BackendConfig {
    /// Create a configuration, computing its hash
    pub fn new(
        backend_type: impl Into<String>,
        attributes: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        let backend_type = backend_type.into();
        let hash = config_hash(&backend_type, &attributes);
        Self {
            backend_type,
            attributes,
            hash,
        }
    }

    /// Rebuild a configuration from a saved backend record. The record's
    /// hash is kept as-is; it identifies the configuration that was
    /// declared when the record was written.
    pub fn from_record(record: &BackendRecord) -> Self {
        Self {
            backend_type: record.backend_type.clone(),
            attributes: record.config.clone(),
            hash: record.hash,
        }
    }

    /// Build a configuration from a legacy remote stanza
    pub fn from_remote_record(record: &RemoteRecord) -> Self {
        let attributes = record
            .config
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        Self::new(record.remote_type.clone(), attributes)
    }

    /// Convert to the record shape persisted in the metadata file
    pub fn to_record(&self) -> BackendRecord {
        BackendRecord {
            backend_type: self.backend_type.clone(),
            config: self.attributes.clone(),
            hash: self.hash,
        }
    }

    /// Get a string attribute value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.attributes.get(key) {
            Some(serde_json::Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get a boolean attribute with a default value
    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        match self.attributes.get(key) {
            Some(serde_json::Value::Bool(b)) => *b,
            _ => default,
        }
    }
}

/// Deterministic digest over a backend type and its attributes.
///
/// Attribute order is fixed by the BTreeMap, so two semantically equal
/// configurations always hash alike.
pub fn config_hash(backend_type: &str, attributes: &BTreeMap<String, serde_json::Value>) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(backend_type.as_bytes());
    for (key, value) in attributes {
        hasher.update([0u8]);
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.to_string().as_bytes());
    }
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// The operation surface of an enhanced backend. Execution semantics are
/// owned by higher layers; this core only routes.
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OperationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Plan,
    Apply,
    Refresh,
}

/// What an operation observed about the state it ran against
#[derive(Debug, Clone)]
pub struct OperationSummary {
    pub kind: OperationKind,
    pub lineage: Option<String>,
    pub serial: u64,
    pub resources: usize,
    pub outputs: usize,
}

/// Trait for state storage backends.
///
/// `configure` is called at most once per instance; `state` is idempotent
/// and the returned manager requires `refresh_state` before its content
/// can be trusted.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Check a configuration without applying it. Returns user-facing
    /// warnings and errors.
    fn validate(&self, config: &BackendConfig) -> (Vec<String>, Vec<String>);

    /// Apply a configuration to this instance
    async fn configure(&mut self, config: &BackendConfig) -> BackendResult<()>;

    /// A fresh state manager over this backend's store
    fn state(&self) -> BackendResult<Box<dyn StateManager>>;

    /// Recover the enhanced surface if this backend has one
    fn into_enhanced(self: Box<Self>) -> Result<Box<dyn Enhanced>, Box<dyn Backend>>;
}

/// A backend that can also execute operations
#[async_trait]
pub trait Enhanced: Backend {
    async fn operation(&self, op: Operation) -> BackendResult<OperationSummary>;
}

impl std::fmt::Debug for dyn Enhanced {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<dyn Enhanced>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = BackendConfig::new("local", attrs(&[("path", serde_json::json!("x.json"))]));
        let b = BackendConfig::new("local", attrs(&[("path", serde_json::json!("x.json"))]));
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_hash_tracks_type_and_attributes() {
        let base = BackendConfig::new("local", attrs(&[("path", serde_json::json!("x.json"))]));
        let other_type = BackendConfig::new("inmem", attrs(&[("path", serde_json::json!("x.json"))]));
        let other_attr = BackendConfig::new("local", attrs(&[("path", serde_json::json!("y.json"))]));
        assert_ne!(base.hash, other_type.hash);
        assert_ne!(base.hash, other_attr.hash);
    }

    #[test]
    fn test_record_round_trip_preserves_hash() {
        let config = BackendConfig::new("local", attrs(&[("path", serde_json::json!("x.json"))]));
        let record = config.to_record();
        let rebuilt = BackendConfig::from_record(&record);
        assert_eq!(rebuilt, config);
    }

    #[test]
    fn test_typed_getters() {
        let config = BackendConfig::new(
            "local",
            attrs(&[
                ("path", serde_json::json!("x.json")),
                ("flag", serde_json::json!(true)),
            ]),
        );
        assert_eq!(config.get_string("path"), Some("x.json"));
        assert_eq!(config.get_string("flag"), None);
        assert!(config.get_bool_or("flag", false));
        assert!(config.get_bool_or("missing", true));
    }
}
