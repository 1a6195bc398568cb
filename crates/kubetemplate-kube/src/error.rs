//! Error types for kubetemplate-kube

use thiserror::Error;

/// Result type for kubetemplate-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while deploying or deleting manifests
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Manifest is missing apiVersion, kind or metadata.name
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    /// The control plane does not serve this apiVersion/kind
    #[error("resource type not found: {api_version}/{kind}")]
    ResourceTypeNotFound { api_version: String, kind: String },

    /// A status payload or a different kind came back where an object was expected
    #[error("unexpected state for {resource}: {message}")]
    UnexpectedState { resource: String, message: String },

    /// Object did not become ready in time
    #[error("timeout ({timeout_secs}s) waiting for {kind}/{name} to become ready")]
    ReadinessTimeout {
        kind: String,
        name: String,
        timeout_secs: u64,
    },

    /// Event stream was asked to watch more than one namespace
    #[error("all objects must be in the same namespace, found: {}", namespaces.join(", "))]
    MixedNamespace { namespaces: Vec<String> },

    /// Object does not exist (raised by clients that do not speak HTTP)
    #[error("{kind}/{name} not found in namespace '{namespace}'")]
    ObjectNotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    /// Transport or control plane failure outside of the kube client
    #[error("cluster error: {0}")]
    Cluster(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A fan-out branch was cancelled because a sibling failed
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A background task panicked or could not be joined
    #[error("task failed: {0}")]
    TaskFailed(String),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            KubeError::ObjectNotFound { .. } => true,
            _ => false,
        }
    }

    pub(crate) fn unexpected(resource: impl Into<String>, message: impl Into<String>) -> Self {
        KubeError::UnexpectedState {
            resource: resource.into(),
            message: message.into(),
        }
    }
}
