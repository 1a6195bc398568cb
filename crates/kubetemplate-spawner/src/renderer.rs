//! Rendering a chart into manifests

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use kubetemplate_kube::Manifest;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Result, SpawnerError};

/// Turns a template directory plus values into manifests
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn render(
        &self,
        template_path: &Path,
        values: &BTreeMap<String, Value>,
    ) -> Result<Vec<Manifest>>;
}

/// Renders with `helm template <path> -f <values>`
#[derive(Debug, Clone)]
pub struct HelmRenderer {
    binary: String,
}

impl HelmRenderer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for HelmRenderer {
    fn default() -> Self {
        Self::new("helm")
    }
}

#[async_trait]
impl TemplateRenderer for HelmRenderer {
    async fn render(
        &self,
        template_path: &Path,
        values: &BTreeMap<String, Value>,
    ) -> Result<Vec<Manifest>> {
        let mut values_file = tempfile::Builder::new().suffix(".yaml").tempfile()?;
        debug!(template_path = %template_path.display(), ?values, "rendering");
        values_file.write_all(serde_yaml::to_string(values)?.as_bytes())?;
        values_file.flush()?;

        info!(
            "Running command {} template {} -f {}",
            self.binary,
            template_path.display(),
            values_file.path().display()
        );
        let output = Command::new(&self.binary)
            .arg("template")
            .arg(template_path)
            .arg("-f")
            .arg(values_file.path())
            .output()
            .await
            .map_err(|e| SpawnerError::RendererUnavailable {
                binary: self.binary.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(SpawnerError::Template {
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(Manifest::parse_documents(&stdout)?)
    }
}
