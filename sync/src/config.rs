//! Configuration management.

use std::env;
use std::path::{Path, PathBuf};

use tether_engine::{Schema, TypeDescription};

/// Where the remote JSON:API server lives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Scheme and authority, e.g. `https://api.example.com`
    pub host: String,
    /// Optional path prefix, e.g. `api/v1`
    pub namespace: Option<String>,
}

impl RemoteConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            namespace: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// `{host}/{namespace}` without a trailing slash. With neither set this
    /// is empty, so paths come out root-relative.
    pub fn base_url(&self) -> String {
        let mut url = self.host.trim_end_matches('/').to_string();
        if let Some(namespace) = self.namespace.as_deref().map(|n| n.trim_matches('/')) {
            if !namespace.is_empty() {
                url.push('/');
                url.push_str(namespace);
            }
        }
        url
    }
}

/// Configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub remote: RemoteConfig,
    /// Path to the model description file
    pub schema_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("TETHER_REMOTE_HOST")
            .filter(|h| !h.trim().is_empty())
            .ok_or(ConfigError::MissingRemoteHost)?;

        let namespace = lookup("TETHER_REMOTE_NAMESPACE").filter(|n| !n.is_empty());
        let schema_path = lookup("TETHER_SCHEMA").map(PathBuf::from);

        Ok(Self {
            remote: RemoteConfig { host, namespace },
            schema_path,
        })
    }

    /// Read and derive the schema named by `TETHER_SCHEMA`.
    pub fn load_schema(&self) -> Result<Schema, ConfigError> {
        let path = self
            .schema_path
            .as_deref()
            .ok_or(ConfigError::MissingSchemaPath)?;
        load_schema(path)
    }
}

/// Read a model description file (a JSON array of `{name, fields}`) and
/// derive the schema from it.
pub fn load_schema(path: &Path) -> Result<Schema, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadSchema {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_schema(&contents)
}

pub fn parse_schema(contents: &str) -> Result<Schema, ConfigError> {
    let descriptions: Vec<TypeDescription> =
        serde_json::from_str(contents).map_err(|e| ConfigError::InvalidSchema(e.to_string()))?;
    Schema::from_descriptions(descriptions).map_err(|e| ConfigError::InvalidSchema(e.to_string()))
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("TETHER_REMOTE_HOST environment variable is required")]
    MissingRemoteHost,

    #[error("Invalid remote host {0:?}")]
    InvalidRemoteHost(String),

    #[error("TETHER_SCHEMA environment variable is required")]
    MissingSchemaPath,

    #[error("Failed to read schema file {path}: {message}")]
    ReadSchema { path: String, message: String },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
}
