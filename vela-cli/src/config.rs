//! Backend configuration loader
//!
//! The backend configuration lives in the `[backend.<type>]` table of
//! `vela.toml`. An absent file or an absent table simply means no backend
//! is declared. Legacy `-backend`/`-backend-config k=v` flags synthesize a
//! configuration that takes priority over the file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use vela_backend::BackendConfig;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILENAME: &str = "vela.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("configuration declares {count} backend blocks; exactly one is allowed")]
    MultipleBackends { count: usize },

    #[error("invalid backend configuration override {0:?}: expected key=value")]
    BadOverride(String),
}

/// Load the declared backend configuration, if any.
///
/// `path` may name the configuration file directly or a directory that is
/// searched for `vela.toml`; `None` searches the current directory. A
/// missing file under a search directory means no configuration; a missing
/// explicitly named file is an error.
pub fn load_backend_config(path: Option<&Path>) -> Result<Option<BackendConfig>, ConfigError> {
    let (file, explicit_file) = match path {
        Some(p) if p.is_dir() => (p.join(DEFAULT_CONFIG_FILENAME), false),
        Some(p) => (p.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILENAME), false),
    };

    let raw = match fs::read_to_string(&file) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit_file => {
            tracing::debug!(path = %file.display(), "no configuration file found");
            return Ok(None);
        }
        Err(source) => return Err(ConfigError::Read { path: file, source }),
    };

    let table: toml::Table = raw.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: file.clone(),
        message: e.to_string(),
    })?;

    let Some(backend_value) = table.get("backend") else {
        return Ok(None);
    };

    let backend_table = backend_value
        .as_table()
        .ok_or_else(|| ConfigError::Parse {
            path: file.clone(),
            message: "\"backend\" must be a table of the form [backend.<type>]".to_string(),
        })?;

    if backend_table.len() > 1 {
        return Err(ConfigError::MultipleBackends {
            count: backend_table.len(),
        });
    }

    let (backend_type, attrs_value) = match backend_table.iter().next() {
        Some((k, v)) => (k.clone(), v.clone()),
        None => return Ok(None),
    };

    let attrs_table = attrs_value.as_table().ok_or_else(|| ConfigError::Parse {
        path: file.clone(),
        message: format!("[backend.{backend_type}] must be a table"),
    })?;

    let mut attributes = BTreeMap::new();
    for (key, value) in attrs_table {
        attributes.insert(key.clone(), toml_to_json(value.clone()));
    }

    Ok(Some(BackendConfig::new(backend_type, attributes)))
}

/// Synthesize a backend configuration from `-backend`/`-backend-config`
/// command-line flags. Values parse as JSON when possible and fall back to
/// plain strings.
pub fn config_from_overrides(
    backend_type: &str,
    pairs: &[String],
) -> Result<BackendConfig, ConfigError> {
    let mut attributes = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| ConfigError::BadOverride(pair.clone()))?;
        if key.is_empty() {
            return Err(ConfigError::BadOverride(pair.clone()));
        }
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        attributes.insert(key.to_string(), value);
    }
    Ok(BackendConfig::new(backend_type, attributes))
}

fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => serde_json::Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}
