//! Rendered manifests and the identities derived from them

use std::collections::BTreeMap;
use std::fmt;

use kube::core::{GroupVersionKind, TypeMeta};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{KubeError, Result};

/// Namespace used when a manifest does not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// A single rendered resource document
///
/// Manifests are kept untyped: the orchestrator only reads identity and
/// annotations, everything else is sent to the API server as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Value);

impl Manifest {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Parse a single YAML document
    pub fn from_yaml(doc: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(doc)?;
        Ok(Self(value))
    }

    /// Parse a multi-document YAML stream, dropping empty documents
    pub fn parse_documents(stream: &str) -> Result<Vec<Self>> {
        let mut manifests = Vec::new();
        for doc in serde_yaml::Deserializer::from_str(stream) {
            let value = Value::deserialize(doc)?;
            if value.is_null() {
                continue;
            }
            manifests.push(Self(value));
        }
        Ok(manifests)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn api_version(&self) -> Option<&str> {
        self.0.get("apiVersion").and_then(Value::as_str)
    }

    pub fn kind(&self) -> Option<&str> {
        self.0.get("kind").and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata()
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata()
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
    }

    /// String-valued annotations; non-string values are ignored
    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.metadata()
            .and_then(|m| m.get("annotations"))
            .and_then(Value::as_object)
            .map(|a| {
                a.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata()
            .and_then(|m| m.get("annotations"))
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
    }

    /// Derive the identity of the object this manifest describes
    pub fn id(&self) -> Result<ResourceId> {
        ResourceId::from_manifest(self)
    }

    /// Serialize back to a YAML document
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.0)?)
    }

    fn metadata(&self) -> Option<&Value> {
        self.0.get("metadata")
    }
}

impl From<Value> for Manifest {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Stable address of one live object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceId {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl ResourceId {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Extract the identity from a manifest
    ///
    /// `apiVersion`, `kind` and `metadata.name` are required; the namespace
    /// falls back to [`DEFAULT_NAMESPACE`].
    pub fn from_manifest(manifest: &Manifest) -> Result<Self> {
        let api_version = manifest
            .api_version()
            .ok_or_else(|| KubeError::MalformedManifest("missing apiVersion".to_string()))?;
        let kind = manifest
            .kind()
            .ok_or_else(|| KubeError::MalformedManifest("missing kind".to_string()))?;
        let name = manifest.name().ok_or_else(|| {
            KubeError::MalformedManifest(format!("{} is missing metadata.name", kind))
        })?;
        let namespace = manifest.namespace().unwrap_or(DEFAULT_NAMESPACE);

        Ok(Self::new(api_version, kind, name, namespace))
    }

    /// Group-Version-Kind of the addressed type
    pub fn gvk(&self) -> GroupVersionKind {
        gvk_from_type_meta(&TypeMeta {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
        })
    }

    /// Longer form used in log lines
    pub fn qualified(&self) -> String {
        format!(
            "{}/{}/{} ns={}",
            self.api_version, self.kind, self.name, self.namespace
        )
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Convert TypeMeta to GroupVersionKind
///
/// - "apps/v1" -> group="apps", version="v1"
/// - "v1" -> group="", version="v1" (core API)
pub fn gvk_from_type_meta(tm: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match tm.api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), tm.api_version.clone()),
    };

    GroupVersionKind {
        group,
        version,
        kind: tm.kind.clone(),
    }
}
