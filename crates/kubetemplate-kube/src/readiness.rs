//! Readiness checks for applied objects
//!
//! There is no uniform readiness signal across kinds, so readiness is
//! decided per kind from a fetched snapshot:
//! - Pod: a `Ready` condition with status `True`
//! - Deployment: generation observed and an `Available=True` condition
//! - DaemonSet: generation observed and every scheduled pod ready
//! - Service: a cluster IP has been assigned
//! - ConfigMap, PersistentVolumeClaim, Secret: ready once they exist
//!
//! Any other kind is assumed ready once it exists.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::DeploymentStatus;
use k8s_openapi::api::core::v1::{PodStatus, ServiceSpec};
use kube::api::DynamicObject;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};

use crate::cluster::{Lookup, STATUS_KIND, object_kind};
use crate::error::{KubeError, Result};
use crate::manifest::{DEFAULT_NAMESPACE, ResourceId};
use crate::resolver::TypeResolver;

/// Decide readiness of a lookup result; missing objects are never ready
pub fn is_ready(lookup: &Lookup) -> bool {
    lookup.object().is_some_and(object_is_ready)
}

/// Decide readiness of a fetched object
///
/// Pure: inspects the snapshot only.
pub fn object_is_ready(obj: &DynamicObject) -> bool {
    let kind = object_kind(obj).unwrap_or_default();
    let generation = obj.metadata.generation;

    match kind {
        "Pod" => parse_field::<PodStatus>(obj, "status")
            .and_then(|s| s.conditions)
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            }),
        "DaemonSet" => {
            let status = obj.data.get("status");
            let field = |name: &str| status.and_then(|s| s.get(name)).and_then(Value::as_i64);
            generation == field("observedGeneration")
                && field("desiredNumberScheduled") == field("numberReady")
        }
        "Deployment" => {
            let status = parse_field::<DeploymentStatus>(obj, "status").unwrap_or_default();
            generation == status.observed_generation
                && status.conditions.is_some_and(|conditions| {
                    conditions
                        .iter()
                        .any(|c| c.type_ == "Available" && c.status == "True")
                })
        }
        "Service" => parse_field::<ServiceSpec>(obj, "spec")
            .and_then(|s| s.cluster_ip)
            .is_some_and(|ip| !ip.is_empty()),
        "ConfigMap" | "PersistentVolumeClaim" | "Secret" => true,
        _ => {
            warn!(
                kind,
                name = obj.metadata.name.as_deref().unwrap_or_default(),
                "unable to check readiness for this kind, assuming ready"
            );
            true
        }
    }
}

fn parse_field<T: DeserializeOwned>(obj: &DynamicObject, field: &str) -> Option<T> {
    obj.data
        .get(field)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

/// Poll cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Pause between fetches
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

/// Waits for objects to become ready
#[derive(Clone)]
pub struct ReadinessPoller {
    resolver: Arc<TypeResolver>,
    config: PollConfig,
}

impl ReadinessPoller {
    pub fn new(resolver: Arc<TypeResolver>, config: PollConfig) -> Self {
        Self { resolver, config }
    }

    /// Poll `id` until it is ready
    ///
    /// Makes at most `timeout_secs` fetches, one per interval. Fetch errors
    /// count as "not ready yet".
    pub async fn wait_ready(&self, id: &ResourceId, timeout_secs: u64) -> Result<()> {
        let client = self.resolver.resolve(&id.api_version, &id.kind).await?;

        info!(resource = %id, timeout_secs, "waiting for object to be ready");
        for _ in 0..timeout_secs {
            match client.get(&id.name, &id.namespace).await {
                Ok(lookup) if is_ready(&lookup) => {
                    info!(resource = %id, "object is ready");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => info!(resource = %id, error = %e, "readiness fetch failed"),
            }
            tokio::time::sleep(self.config.interval).await;
        }

        Err(KubeError::ReadinessTimeout {
            kind: id.kind.clone(),
            name: id.name.clone(),
            timeout_secs,
        })
    }

    /// Wait for an object returned by create or patch
    ///
    /// Rejects status payloads before polling starts.
    pub async fn wait_applied(&self, obj: &DynamicObject, timeout_secs: u64) -> Result<()> {
        let id = applied_id(obj)?;
        self.wait_ready(&id, timeout_secs).await
    }
}

/// Identity of an object as returned by the API server
fn applied_id(obj: &DynamicObject) -> Result<ResourceId> {
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| KubeError::unexpected("object", "response carries no apiVersion/kind"))?;
    let name = obj.metadata.name.as_deref().unwrap_or_default();

    if types.kind == STATUS_KIND {
        let message = obj
            .data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("status response");
        return Err(KubeError::unexpected(
            format!("{}/{}", types.kind, name),
            message,
        ));
    }
    if name.is_empty() {
        return Err(KubeError::unexpected(
            types.kind.as_str(),
            "response carries no metadata.name",
        ));
    }

    Ok(ResourceId::new(
        types.api_version.as_str(),
        types.kind.as_str(),
        name,
        obj.metadata
            .namespace
            .as_deref()
            .unwrap_or(DEFAULT_NAMESPACE),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Cluster, MockCluster};
    use crate::manifest::Manifest;
    use serde_json::json;

    fn object(value: Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    fn pod(conditions: Value) -> DynamicObject {
        object(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "web", "namespace": "default" },
            "status": { "conditions": conditions }
        }))
    }

    #[test]
    fn test_pod_ready_condition() {
        assert!(object_is_ready(&pod(json!([
            { "type": "PodScheduled", "status": "True" },
            { "type": "Ready", "status": "True" }
        ]))));
        assert!(!object_is_ready(&pod(json!([
            { "type": "Ready", "status": "False" }
        ]))));
        assert!(!object_is_ready(&pod(json!([]))));
    }

    #[test]
    fn test_pod_without_status_not_ready() {
        let obj = object(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "web" }
        }));
        assert!(!object_is_ready(&obj));
    }

    #[test]
    fn test_deployment_requires_observed_generation() {
        let available = json!([{ "type": "Available", "status": "True" }]);
        let stale = object(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web", "generation": 3 },
            "status": { "observedGeneration": 2, "conditions": available }
        }));
        assert!(!object_is_ready(&stale));

        let current = object(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web", "generation": 3 },
            "status": { "observedGeneration": 3, "conditions": available }
        }));
        assert!(object_is_ready(&current));
    }

    #[test]
    fn test_deployment_unavailable() {
        let obj = object(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web", "generation": 1 },
            "status": {
                "observedGeneration": 1,
                "conditions": [{ "type": "Available", "status": "False" }]
            }
        }));
        assert!(!object_is_ready(&obj));
    }

    #[test]
    fn test_daemonset_ready() {
        let ready = object(json!({
            "apiVersion": "apps/v1",
            "kind": "DaemonSet",
            "metadata": { "name": "agent", "generation": 2 },
            "status": {
                "observedGeneration": 2,
                "desiredNumberScheduled": 3,
                "numberReady": 3
            }
        }));
        assert!(object_is_ready(&ready));

        let rolling = object(json!({
            "apiVersion": "apps/v1",
            "kind": "DaemonSet",
            "metadata": { "name": "agent", "generation": 2 },
            "status": {
                "observedGeneration": 2,
                "desiredNumberScheduled": 3,
                "numberReady": 2
            }
        }));
        assert!(!object_is_ready(&rolling));
    }

    #[test]
    fn test_service_cluster_ip() {
        let assigned = object(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "web" },
            "spec": { "clusterIP": "10.96.0.12" }
        }));
        assert!(object_is_ready(&assigned));

        let pending = object(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "web" },
            "spec": { "ports": [{ "port": 80 }] }
        }));
        assert!(!object_is_ready(&pending));
    }

    #[test]
    fn test_config_kinds_always_ready() {
        for kind in ["ConfigMap", "Secret", "PersistentVolumeClaim"] {
            let obj = object(json!({
                "apiVersion": "v1",
                "kind": kind,
                "metadata": { "name": "x" }
            }));
            assert!(object_is_ready(&obj), "{kind} should be ready");
        }
    }

    #[test]
    fn test_unknown_kind_assumed_ready() {
        let obj = object(json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": { "name": "x" }
        }));
        assert!(object_is_ready(&obj));
    }

    #[test]
    fn test_not_found_never_ready() {
        assert!(!is_ready(&Lookup::NotFound));
    }

    #[test]
    fn test_predicate_is_deterministic() {
        let obj = pod(json!([{ "type": "Ready", "status": "True" }]));
        assert_eq!(object_is_ready(&obj), object_is_ready(&obj.clone()));
    }

    #[tokio::test]
    async fn test_predicate_never_calls_cluster() {
        let cluster = MockCluster::new();
        create_pod(&cluster, "web").await;
        let stored = cluster.object("Pod", "default", "web").unwrap();
        let before = cluster.operation_counts();

        let verdicts: Vec<bool> = (0..5).map(|_| object_is_ready(&stored)).collect();
        assert!(!is_ready(&Lookup::Found(stored.clone())));

        assert!(verdicts.iter().all(|ready| !ready));
        assert_eq!(cluster.operation_counts(), before);
    }

    fn poller(cluster: &MockCluster) -> ReadinessPoller {
        let resolver = Arc::new(TypeResolver::new(Arc::new(cluster.clone())));
        ReadinessPoller::new(resolver, PollConfig::default())
    }

    async fn create_pod(cluster: &MockCluster, name: &str) -> DynamicObject {
        let manifest = Manifest::new(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": name, "namespace": "default" }
        }));
        let pods = cluster.discover("v1", "Pod").await.unwrap();
        pods.create("default", &manifest).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_after_polls() {
        let cluster = MockCluster::new();
        cluster.ready_after("Pod", "web", 3);
        let created = create_pod(&cluster, "web").await;

        let start = tokio::time::Instant::now();
        poller(&cluster).wait_applied(&created, 5).await.unwrap();

        assert_eq!(cluster.get_count("Pod", "web"), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_times_out() {
        let cluster = MockCluster::new();
        cluster.never_ready("Pod", "web");
        let created = create_pod(&cluster, "web").await;

        let err = poller(&cluster).wait_applied(&created, 5).await.unwrap_err();
        match err {
            KubeError::ReadinessTimeout {
                kind,
                name,
                timeout_secs,
            } => {
                assert_eq!(kind, "Pod");
                assert_eq!(name, "web");
                assert_eq!(timeout_secs, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(cluster.get_count("Pod", "web"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_tolerates_fetch_errors() {
        let cluster = MockCluster::new();
        let created = create_pod(&cluster, "web").await;
        cluster.fail_gets("Pod", "web", 2);

        poller(&cluster).wait_applied(&created, 5).await.unwrap();
        assert_eq!(cluster.get_count("Pod", "web"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_zero_timeout() {
        let cluster = MockCluster::new();
        let created = create_pod(&cluster, "web").await;

        let err = poller(&cluster).wait_applied(&created, 0).await.unwrap_err();
        assert!(matches!(err, KubeError::ReadinessTimeout { .. }));
        assert_eq!(cluster.get_count("Pod", "web"), 0);
    }

    #[tokio::test]
    async fn test_wait_applied_rejects_status() {
        let cluster = MockCluster::new();
        let status = object(json!({
            "apiVersion": "v1",
            "kind": "Status",
            "metadata": {},
            "status": "Failure",
            "message": "admission webhook denied the request",
            "code": 403
        }));

        let err = poller(&cluster).wait_applied(&status, 5).await.unwrap_err();
        assert!(matches!(err, KubeError::UnexpectedState { .. }));
        assert!(err.to_string().contains("admission webhook"));
        assert_eq!(cluster.operation_counts().gets, 0);
    }
}
