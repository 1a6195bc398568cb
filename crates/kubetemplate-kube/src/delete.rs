//! Annotation-gated deletion
//!
//! A manifest set is shared by several teardown paths (stopping a server,
//! removing a user), so each object opts in to deletion per path through
//! its live annotations. Objects whose annotations don't match are left
//! alone.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::cluster::{Lookup, STATUS_KIND, object_kind};
use crate::error::Result;
use crate::manifest::{Manifest, ResourceId};
use crate::readiness::PollConfig;
use crate::resolver::TypeResolver;

/// What happened to one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Deleted, and gone if confirmation was requested
    Deleted,
    /// Delete accepted but the object was still present at the timeout
    Unconfirmed,
    /// Not deleted
    Skipped { reason: String },
}

/// Result of deleting a single manifest
#[derive(Debug, Clone)]
pub struct DeleteResult {
    pub id: ResourceId,
    pub outcome: DeleteOutcome,
}

impl DeleteResult {
    pub fn deleted(&self) -> bool {
        self.outcome == DeleteOutcome::Deleted
    }

    pub fn skip_reason(&self) -> Option<&str> {
        match &self.outcome {
            DeleteOutcome::Skipped { reason } => Some(reason),
            _ => None,
        }
    }
}

/// First required annotation the live object lacks, as `key=value`
pub fn missing_annotation(
    live: &BTreeMap<String, String>,
    required: &BTreeMap<String, String>,
) -> Option<String> {
    required
        .iter()
        .find(|(k, v)| live.get(*k) != Some(*v))
        .map(|(k, v)| format!("{}={}", k, v))
}

/// Deletes objects that carry the required annotations
#[derive(Clone)]
pub struct Deleter {
    resolver: Arc<TypeResolver>,
    config: PollConfig,
}

impl Deleter {
    pub fn new(resolver: Arc<TypeResolver>, config: PollConfig) -> Self {
        Self { resolver, config }
    }

    /// Delete the object described by `manifest` if its live annotations
    /// contain every entry of `required`
    ///
    /// With a non-zero `timeout_secs` the object is polled until it is gone;
    /// running out of time is logged, not returned as an error.
    pub async fn delete(
        &self,
        manifest: &Manifest,
        required: &BTreeMap<String, String>,
        timeout_secs: u64,
    ) -> Result<DeleteResult> {
        let id = manifest.id()?;
        let client = self.resolver.resolve(&id.api_version, &id.kind).await?;

        let live = match client.get(&id.name, &id.namespace).await? {
            Lookup::Found(obj) if object_kind(&obj) != Some(STATUS_KIND) => obj,
            _ => {
                info!("Not deleting {} ns={}: not found", id, id.namespace);
                return Ok(skipped(id, "not found"));
            }
        };

        let annotations = live.metadata.annotations.unwrap_or_default();
        if let Some(missing) = missing_annotation(&annotations, required) {
            info!("Not deleting {} ns={}: Missing {}", id, id.namespace, missing);
            return Ok(skipped(id, format!("missing {}", missing)));
        }

        info!("Deleting {} ns={}", id, id.namespace);
        if let Err(e) = client.delete(&id.name, &id.namespace).await {
            if e.is_not_found() {
                info!("{} already deleted", id);
                return Ok(deleted(id));
            }
            error!(resource = %id.qualified(), error = %e, "failed to delete");
            return Err(e);
        }

        if timeout_secs == 0 {
            info!("Delete request sent for {}", id);
            return Ok(deleted(id));
        }

        for _ in 0..timeout_secs {
            let gone = match client.get(&id.name, &id.namespace).await {
                Ok(Lookup::NotFound) => true,
                Ok(Lookup::Found(obj)) => object_kind(&obj) == Some(STATUS_KIND),
                Err(e) => {
                    warn!(resource = %id.qualified(), error = %e, "failed to confirm deletion");
                    false
                }
            };
            if gone {
                info!("{} deleted", id);
                return Ok(deleted(id));
            }
            tokio::time::sleep(self.config.interval).await;
        }

        error!("Timeout waiting for {} to be deleted", id);
        Ok(DeleteResult {
            id,
            outcome: DeleteOutcome::Unconfirmed,
        })
    }
}

fn deleted(id: ResourceId) -> DeleteResult {
    DeleteResult {
        id,
        outcome: DeleteOutcome::Deleted,
    }
}

fn skipped(id: ResourceId, reason: impl Into<String>) -> DeleteResult {
    DeleteResult {
        id,
        outcome: DeleteOutcome::Skipped {
            reason: reason.into(),
        },
    }
}
