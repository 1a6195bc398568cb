//! Error types for kubetemplate-spawner

use std::path::PathBuf;

use kubetemplate_kube::KubeError;
use thiserror::Error;

/// Result type for kubetemplate-spawner operations
pub type Result<T> = std::result::Result<T, SpawnerError>;

/// Errors raised while managing a session
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SpawnerError {
    /// Cluster operation failed
    #[error(transparent)]
    Kube(#[from] KubeError),

    /// Template rendering failed
    #[error("templating failed: {stderr}")]
    Template { stderr: String },

    /// Renderer binary could not be started
    #[error("failed to run '{binary}': {message}")]
    RendererUnavailable { binary: String, message: String },

    /// Invalid configuration
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Template directory is unusable
    #[error("invalid template path {}: {reason}", path.display())]
    InvalidTemplatePath { path: PathBuf, reason: String },

    /// Server name contains disallowed characters
    #[error("invalid server name: {name:?}")]
    InvalidServerName { name: String },

    /// More than one manifest is marked as the connection endpoint
    #[error("multiple manifests with {key}=true found")]
    MultipleConnectionManifests { key: String },

    /// No manifest is marked as the connection endpoint
    #[error("no manifest with {key}=true found")]
    NoConnectionManifest { key: String },

    /// The connection object's kind has no known address
    #[error("unable to connect to {kind}")]
    UnsupportedConnectionKind { kind: String },

    /// The connection object exists but carries no address yet
    #[error("{resource} has no address: {message}")]
    MissingAddress { resource: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SpawnerError {
    fn from(e: serde_json::Error) -> Self {
        SpawnerError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for SpawnerError {
    fn from(e: serde_yaml::Error) -> Self {
        SpawnerError::Serialization(e.to_string())
    }
}

impl SpawnerError {
    /// Check if this wraps a missing cluster object
    pub fn is_not_found(&self) -> bool {
        matches!(self, SpawnerError::Kube(e) if e.is_not_found())
    }
}
