//! Deploy and teardown of whole manifest sets
//!
//! Every manifest gets its own branch: apply then wait for readiness on
//! deploy, gated delete on teardown. Branches run concurrently with no
//! ordering between them, and the first failure cancels the rest.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use kube::api::DynamicObject;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use crate::cluster::{Cluster, Lookup, STATUS_KIND, object_kind};
use crate::delete::{DeleteOutcome, Deleter};
use crate::error::{KubeError, Result};
use crate::events::{EventStream, single_namespace};
use crate::manifest::{Manifest, ResourceId};
use crate::progress::ProgressSender;
use crate::readiness::{PollConfig, ReadinessPoller};
use crate::reconcile::Reconciler;
use crate::resolver::TypeResolver;

/// Default per-object timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 180;

/// Summary of a deploy or delete pass
#[derive(Debug, Clone, Default)]
pub struct OperationSummary {
    /// Processed resources
    pub succeeded: Vec<String>,
    /// Resources left alone, with the reason
    pub skipped: Vec<(String, String)>,
    /// Deletions not confirmed before the timeout
    pub unconfirmed: Vec<String>,
}

impl OperationSummary {
    /// Whether every deletion was confirmed
    pub fn is_complete(&self) -> bool {
        self.unconfirmed.is_empty()
    }

    /// Get total count
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.skipped.len() + self.unconfirmed.len()
    }

    /// Format as human-readable summary
    pub fn summary(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if !self.succeeded.is_empty() {
            parts.push(format!("{} succeeded", self.succeeded.len()));
        }
        if !self.skipped.is_empty() {
            parts.push(format!("{} skipped", self.skipped.len()));
        }
        if !self.unconfirmed.is_empty() {
            parts.push(format!("{} unconfirmed", self.unconfirmed.len()));
        }
        if parts.is_empty() {
            "No resources processed".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Drives deploy and teardown against one cluster
pub struct Orchestrator {
    resolver: Arc<TypeResolver>,
    reconciler: Reconciler,
    poller: ReadinessPoller,
    deleter: Deleter,
    events: EventStream,
    timeout_secs: u64,
}

impl Orchestrator {
    pub fn new(cluster: Arc<dyn Cluster>) -> Self {
        let resolver = Arc::new(TypeResolver::new(cluster));
        let config = PollConfig::default();
        Self {
            reconciler: Reconciler::new(resolver.clone()),
            poller: ReadinessPoller::new(resolver.clone(), config),
            deleter: Deleter::new(resolver.clone(), config),
            events: EventStream::new(resolver.clone()),
            resolver,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Per-object timeout for readiness, deletion and the event watch
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_poll_config(mut self, config: PollConfig) -> Self {
        self.poller = ReadinessPoller::new(self.resolver.clone(), config);
        self.deleter = Deleter::new(self.resolver.clone(), config);
        self
    }

    /// Apply every manifest and wait until each object is ready
    ///
    /// Namespace events about the batch are forwarded to `observer` while
    /// the deploy runs.
    pub async fn deploy_all(
        &self,
        manifests: &[Manifest],
        observer: Option<ProgressSender>,
    ) -> Result<OperationSummary> {
        let ids = manifests
            .iter()
            .map(Manifest::id)
            .collect::<Result<Vec<_>>>()?;
        single_namespace(&ids)?;

        info!("Deploying {} manifests...", manifests.len());

        let events = {
            let stream = self.events.clone();
            let ids = ids.clone();
            let timeout = self.timeout_secs;
            // aborted with the deploy, including when the caller drops this future
            AbortOnDropHandle::new(tokio::spawn(async move {
                stream.run(observer, &ids, timeout).await
            }))
        };

        let reconciler = self.reconciler.clone();
        let poller = self.poller.clone();
        let timeout = self.timeout_secs;
        let deployed = fan_out(manifests.to_vec(), move |manifest| {
            let reconciler = reconciler.clone();
            let poller = poller.clone();
            async move {
                let applied = reconciler.apply(&manifest).await?;
                poller.wait_applied(&applied.object, timeout).await?;
                Ok(format!("{} ({})", applied.id, applied.action()))
            }
        })
        .await;

        events.abort();
        let watched = match events.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => {
                let names: Vec<String> = ids.iter().map(ResourceId::to_string).collect();
                info!("Cancelled: events({})", names.join(" "));
                Ok(())
            }
            Err(e) => Err(KubeError::TaskFailed(e.to_string())),
        };

        let succeeded = deployed?;
        watched?;

        Ok(OperationSummary {
            succeeded,
            ..Default::default()
        })
    }

    /// Delete every manifest whose live object carries `required` annotations
    pub async fn delete_all(
        &self,
        manifests: &[Manifest],
        required: &BTreeMap<String, String>,
    ) -> Result<OperationSummary> {
        info!("Deleting {} manifests", manifests.len());

        let deleter = self.deleter.clone();
        let required = Arc::new(required.clone());
        let timeout = self.timeout_secs;
        let results = fan_out(manifests.to_vec(), move |manifest| {
            let deleter = deleter.clone();
            let required = required.clone();
            async move { deleter.delete(&manifest, &required, timeout).await }
        })
        .await?;

        let mut summary = OperationSummary::default();
        for result in results {
            let name = result.id.to_string();
            match result.outcome {
                DeleteOutcome::Deleted => summary.succeeded.push(name),
                DeleteOutcome::Unconfirmed => summary.unconfirmed.push(name),
                DeleteOutcome::Skipped { reason } => summary.skipped.push((name, reason)),
            }
        }
        Ok(summary)
    }

    /// Fetch a live object that must exist
    pub async fn get_live(&self, id: &ResourceId) -> Result<DynamicObject> {
        let client = self.resolver.resolve(&id.api_version, &id.kind).await?;
        match client.get(&id.name, &id.namespace).await? {
            Lookup::Found(obj) if object_kind(&obj) == Some(STATUS_KIND) => Err(
                KubeError::unexpected(id.to_string(), "cluster returned a status payload"),
            ),
            Lookup::Found(obj) => Ok(obj),
            Lookup::NotFound => Err(KubeError::ObjectNotFound {
                kind: id.kind.clone(),
                name: id.name.clone(),
                namespace: id.namespace.clone(),
            }),
        }
    }
}

/// Run `op` for every item concurrently; all must succeed
///
/// The first failure cancels the remaining branches and is returned.
/// Successful results keep the order of `items`.
async fn fan_out<T, R, F, Fut>(items: Vec<T>, op: F) -> Result<Vec<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();
    let count = items.len();

    for (index, item) in items.into_iter().enumerate() {
        let token = cancel.clone();
        let branch = op(item);
        tasks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    (index, Err(KubeError::Cancelled("a sibling operation failed".to_string())))
                }
                result = branch => (index, result),
            }
        });
    }

    let mut results: Vec<Option<R>> = std::iter::repeat_with(|| None).take(count).collect();
    let mut first_error: Option<KubeError> = None;

    while let Some(joined) = tasks.join_next().await {
        let failure = match joined {
            Ok((index, Ok(value))) => {
                results[index] = Some(value);
                continue;
            }
            Ok((_, Err(e))) => e,
            Err(e) if e.is_cancelled() => {
                debug!("fan-out branch cancelled");
                continue;
            }
            Err(e) => KubeError::TaskFailed(e.to_string()),
        };

        if first_error.is_none() {
            warn!(error = %failure, "operation failed, cancelling remaining branches");
            cancel.cancel();
            tasks.abort_all();
            first_error = Some(failure);
        } else {
            debug!(error = %failure, "branch failed after cancellation");
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(results.into_iter().flatten().collect()),
    }
}
