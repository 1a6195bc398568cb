//! Create-or-update for single manifests
//!
//! Mirrors what `kubectl apply` does for one document, without server-side
//! apply: the live object is fetched first, then either patched with the
//! manifest as a JSON merge patch or created. Applying never waits for
//! readiness and never deletes anything.

use std::sync::Arc;

use kube::api::DynamicObject;
use serde_json::Value;
use tracing::{info, warn};

use crate::cluster::{Lookup, STATUS_KIND, object_kind};
use crate::error::{KubeError, Result};
use crate::manifest::{Manifest, ResourceId};
use crate::resolver::TypeResolver;

/// Result of applying a single manifest
#[derive(Debug, Clone)]
pub struct ApplyResult {
    /// Identity derived from the manifest
    pub id: ResourceId,
    /// Whether it was created (true) or patched (false)
    pub created: bool,
    /// Object as returned by the API server
    pub object: DynamicObject,
}

impl ApplyResult {
    pub fn action(&self) -> &'static str {
        if self.created { "created" } else { "configured" }
    }
}

/// What to do with a manifest given the live state
#[derive(Debug, PartialEq, Eq)]
enum Action {
    Create,
    Patch,
}

/// Applies manifests against the cluster
#[derive(Clone)]
pub struct Reconciler {
    resolver: Arc<TypeResolver>,
}

impl Reconciler {
    pub fn new(resolver: Arc<TypeResolver>) -> Self {
        Self { resolver }
    }

    /// Create the object if it is missing, patch it otherwise
    pub async fn apply(&self, manifest: &Manifest) -> Result<ApplyResult> {
        let id = manifest.id()?;
        let client = self.resolver.resolve(&id.api_version, &id.kind).await?;

        let lookup = match client.get(&id.name, &id.namespace).await {
            Ok(lookup) => lookup,
            Err(e) => {
                if !e.is_not_found() {
                    warn!(resource = %id.qualified(), error = %e, "fetch failed, attempting create");
                }
                Lookup::NotFound
            }
        };

        let (object, created) = match decide(&id, &lookup)? {
            Action::Patch => {
                info!("Updating {}/{}/{}", id.api_version, id.kind, id.name);
                (client.patch(&id.name, &id.namespace, manifest).await?, false)
            }
            Action::Create => {
                info!("Creating {}/{}/{}", id.api_version, id.kind, id.name);
                (client.create(&id.namespace, manifest).await?, true)
            }
        };

        Ok(ApplyResult {
            id,
            created,
            object,
        })
    }
}

fn decide(id: &ResourceId, lookup: &Lookup) -> Result<Action> {
    let Some(obj) = lookup.object() else {
        return Ok(Action::Create);
    };

    match object_kind(obj) {
        Some(kind) if kind == id.kind => Ok(Action::Patch),
        Some(STATUS_KIND) if status_is_not_found(obj) => Ok(Action::Create),
        Some(kind) => Err(KubeError::unexpected(
            id.to_string(),
            format!("cluster returned a {} where {} was expected", kind, id.kind),
        )),
        None => Err(KubeError::unexpected(
            id.to_string(),
            "cluster returned an object without a kind",
        )),
    }
}

/// Whether a `Status` payload reports a missing object
fn status_is_not_found(obj: &DynamicObject) -> bool {
    obj.data.get("code").and_then(Value::as_i64) == Some(404)
        || obj.data.get("reason").and_then(Value::as_str) == Some("NotFound")
}
