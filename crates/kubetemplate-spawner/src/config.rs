//! Spawner configuration
//!
//! Loaded from a YAML file, by default `~/.config/kubetemplate/config.yaml`

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, SpawnerError};

/// Namespace file mounted into pods running with a service account
pub const SERVICE_ACCOUNT_NAMESPACE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Port used when none is configured
pub const DEFAULT_PORT: u16 = 8888;

/// Spawner configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnerConfig {
    /// Directory containing the Helm chart for the server
    pub template_path: PathBuf,

    /// Namespace all session objects are created in
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Annotation gating deletion; `server` for stop, `user` for delete-forever
    #[serde(default = "default_deletion_annotation_key")]
    pub deletion_annotation_key: String,

    /// Annotation marking the object used to reach the server
    #[serde(default = "default_connection_annotation_key")]
    pub connection_annotation_key: String,

    /// Per-object timeout for readiness and deletion
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Address the server listens on
    #[serde(default = "default_ip")]
    pub ip: String,

    /// Port the server listens on; 0 means the default port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment passed to the template as `env`
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Additional template values, merged last
    #[serde(default)]
    pub extra_vars: BTreeMap<String, Value>,

    /// Helm executable used for rendering
    #[serde(default = "default_helm_binary")]
    pub helm_binary: String,
}

fn default_namespace() -> String {
    namespace_from_file(Path::new(SERVICE_ACCOUNT_NAMESPACE))
}

fn default_deletion_annotation_key() -> String {
    "kubetemplatespawner/delete".to_string()
}

fn default_connection_annotation_key() -> String {
    "kubetemplatespawner/connection".to_string()
}

fn default_timeout_seconds() -> u64 {
    kubetemplate_kube::DEFAULT_TIMEOUT_SECS
}

fn default_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_helm_binary() -> String {
    "helm".to_string()
}

/// Namespace from a service account file, or `default`
fn namespace_from_file(path: &Path) -> String {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| kubetemplate_kube::DEFAULT_NAMESPACE.to_string())
}

impl SpawnerConfig {
    /// Create a configuration with defaults for everything but the chart
    pub fn new(template_path: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
            namespace: default_namespace(),
            deletion_annotation_key: default_deletion_annotation_key(),
            connection_annotation_key: default_connection_annotation_key(),
            timeout_seconds: default_timeout_seconds(),
            ip: default_ip(),
            port: default_port(),
            env: BTreeMap::new(),
            extra_vars: BTreeMap::new(),
            helm_binary: default_helm_binary(),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default configuration path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| SpawnerError::InvalidConfig {
            message: "Could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("kubetemplate").join("config.yaml"))
    }

    /// Check the chart directory and annotation keys
    pub fn validate(&self) -> Result<()> {
        let path = &self.template_path;
        if !path.is_dir() {
            return Err(SpawnerError::InvalidTemplatePath {
                path: path.clone(),
                reason: "template_path must be a directory".to_string(),
            });
        }

        let has_yaml = std::fs::read_dir(path)?
            .filter_map(|entry| entry.ok())
            .any(|entry| entry.path().extension().is_some_and(|ext| ext == "yaml"));
        if !has_yaml {
            return Err(SpawnerError::InvalidTemplatePath {
                path: path.clone(),
                reason: "no *.yaml files found in template_path".to_string(),
            });
        }

        if self.deletion_annotation_key.is_empty() || self.connection_annotation_key.is_empty() {
            return Err(SpawnerError::InvalidConfig {
                message: "annotation keys must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Port to report, falling back to the default when unset
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 { DEFAULT_PORT } else { self.port }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chart_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Chart.yaml"), "name: server\nversion: 0.1.0\n").unwrap();
        dir
    }

    #[test]
    fn test_defaults_from_minimal_yaml() {
        let config: SpawnerConfig = serde_yaml::from_str("templatePath: /charts/server").unwrap();
        assert_eq!(config.template_path, PathBuf::from("/charts/server"));
        assert_eq!(config.deletion_annotation_key, "kubetemplatespawner/delete");
        assert_eq!(config.connection_annotation_key, "kubetemplatespawner/connection");
        assert_eq!(config.timeout_seconds, 180);
        assert_eq!(config.ip, "0.0.0.0");
        assert_eq!(config.port, 8888);
        assert_eq!(config.helm_binary, "helm");
        assert!(config.extra_vars.is_empty());
    }

    #[test]
    fn test_namespace_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("namespace");
        std::fs::write(&path, "jupyter\n").unwrap();
        assert_eq!(namespace_from_file(&path), "jupyter");
        assert_eq!(namespace_from_file(&dir.path().join("missing")), "default");
    }

    #[test]
    fn test_save_and_load() {
        let dir = chart_dir();
        let mut config = SpawnerConfig::new(dir.path());
        config.namespace = "users".to_string();
        config
            .extra_vars
            .insert("image".to_string(), Value::String("jupyter/base".to_string()));

        let path = dir.path().join("nested").join("config.yaml");
        config.save_to(&path).unwrap();
        let loaded = SpawnerConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validate_template_path() {
        let dir = chart_dir();
        assert!(SpawnerConfig::new(dir.path()).validate().is_ok());

        let empty = TempDir::new().unwrap();
        let err = SpawnerConfig::new(empty.path()).validate().unwrap_err();
        assert!(err.to_string().contains("no *.yaml files"));

        let file = dir.path().join("Chart.yaml");
        let err = SpawnerConfig::new(&file).validate().unwrap_err();
        assert!(err.to_string().contains("must be a directory"));
    }

    #[test]
    fn test_effective_port() {
        let mut config = SpawnerConfig::new("/charts/server");
        config.port = 0;
        assert_eq!(config.effective_port(), 8888);
        config.port = 9000;
        assert_eq!(config.effective_port(), 9000);
    }
}
