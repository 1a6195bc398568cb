//! Per-user server sessions
//!
//! A [`Spawner`] owns one session: it renders the chart once, deploys the
//! result, finds the object to connect to and tears everything down again.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::api::DynamicObject;
use kubetemplate_kube::cluster::object_kind;
use kubetemplate_kube::progress::{self, DEFAULT_CAPACITY};
use kubetemplate_kube::{
    Cluster, KubeError, Manifest, OperationSummary, Orchestrator, PollConfig, ProgressEvent,
    ProgressFeed, ProgressSender,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::SpawnerConfig;
use crate::error::{Result, SpawnerError};
use crate::names::SessionNames;
use crate::renderer::{HelmRenderer, TemplateRenderer};
use crate::session::{SessionPhase, SessionState};

/// Deletion reason used when a server is stopped
pub const DELETE_FOR_SERVER: &str = "server";

/// Deletion reason used when a user is removed
pub const DELETE_FOR_USER: &str = "user";

/// Values handed to the renderer for a session
///
/// Name values first, then `namespace`, `ip`, `port` and `env`, with
/// `extraVars` applied last so they can override anything.
pub fn template_values(config: &SpawnerConfig, names: &SessionNames) -> BTreeMap<String, Value> {
    let mut vars = names.template_values();
    vars.insert("namespace".to_string(), Value::from(config.namespace.clone()));
    vars.insert("ip".to_string(), Value::from(config.ip.clone()));
    vars.insert("port".to_string(), Value::from(config.effective_port()));
    vars.insert(
        "env".to_string(),
        Value::Object(
            config
                .env
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v.clone())))
                .collect(),
        ),
    );
    vars.extend(config.extra_vars.clone());
    vars
}

/// Lifecycle manager for one server session
pub struct Spawner<R: TemplateRenderer = HelmRenderer> {
    config: SpawnerConfig,
    names: SessionNames,
    renderer: R,
    orchestrator: Orchestrator,
    state: SessionState,
    phase: SessionPhase,
    /// Sender for the next start; dropped when that start returns
    progress_tx: Option<ProgressSender>,
    progress: Option<ProgressFeed>,
}

impl Spawner<HelmRenderer> {
    /// Create a spawner rendering with the configured Helm binary
    pub fn with_helm(config: SpawnerConfig, names: SessionNames, cluster: Arc<dyn Cluster>) -> Self {
        let renderer = HelmRenderer::new(config.helm_binary.clone());
        Self::new(config, names, renderer, cluster)
    }
}

impl<R: TemplateRenderer> Spawner<R> {
    pub fn new(
        config: SpawnerConfig,
        names: SessionNames,
        renderer: R,
        cluster: Arc<dyn Cluster>,
    ) -> Self {
        let orchestrator = Orchestrator::new(cluster).with_timeout(config.timeout_seconds);
        let (progress_tx, feed) = progress::channel(DEFAULT_CAPACITY);
        Self {
            config,
            names,
            renderer,
            orchestrator,
            state: SessionState::default(),
            phase: SessionPhase::Empty,
            progress_tx: Some(progress_tx),
            progress: Some(feed),
        }
    }

    pub fn with_poll_config(mut self, config: PollConfig) -> Self {
        self.orchestrator = self.orchestrator.with_poll_config(config);
        self
    }

    pub fn config(&self) -> &SpawnerConfig {
        &self.config
    }

    pub fn names(&self) -> &SessionNames {
        &self.names
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    /// Values handed to the renderer
    pub fn template_vars(&self) -> BTreeMap<String, Value> {
        template_values(&self.config, &self.names)
    }

    /// Manifests for this session, rendered on first access
    pub async fn manifests(&mut self) -> Result<&[Manifest]> {
        if self.state.manifests.is_empty() {
            let vars = self.template_vars();
            let rendered = self
                .renderer
                .render(&self.config.template_path, &vars)
                .await?;
            info!("Rendered {} manifests", rendered.len());
            self.state.manifests = rendered;
            if self.phase == SessionPhase::Empty {
                self.phase = SessionPhase::Rendered;
            }
        }
        Ok(&self.state.manifests)
    }

    /// The single manifest annotated as the connection endpoint
    pub async fn connection_manifest(&mut self) -> Result<Manifest> {
        if let Some(manifest) = &self.state.connection_manifest {
            return Ok(manifest.clone());
        }

        let key = self.config.connection_annotation_key.clone();
        let mut selected: Option<Manifest> = None;
        for manifest in self.manifests().await? {
            if manifest.annotation(&key) != Some("true") {
                continue;
            }
            if selected.is_some() {
                return Err(SpawnerError::MultipleConnectionManifests { key });
            }
            selected = Some(manifest.clone());
        }

        let manifest = selected.ok_or(SpawnerError::NoConnectionManifest { key })?;
        self.state.connection_manifest = Some(manifest.clone());
        Ok(manifest)
    }

    /// Live state of the connection object
    pub async fn connection_object(&mut self) -> Result<DynamicObject> {
        let manifest = self.connection_manifest().await?;
        let obj = self.orchestrator.get_live(&manifest.id()?).await?;
        Ok(obj)
    }

    /// Address and port to reach the server through `obj`
    pub fn connection_address(&self, obj: &DynamicObject) -> Result<(String, u16)> {
        let kind = object_kind(obj).unwrap_or_default();
        let name = obj.metadata.name.as_deref().unwrap_or_default();

        let address = match kind {
            "Pod" => obj
                .data
                .get("status")
                .and_then(|s| s.get("podIP"))
                .and_then(Value::as_str)
                .filter(|ip| !ip.is_empty())
                .map(str::to_string)
                .ok_or_else(|| SpawnerError::MissingAddress {
                    resource: format!("Pod/{}", name),
                    message: "status.podIP is not set".to_string(),
                })?,
            "Service" => {
                let namespace = obj.metadata.namespace.as_deref().unwrap_or_default();
                if name.is_empty() || namespace.is_empty() {
                    return Err(SpawnerError::MissingAddress {
                        resource: format!("Service/{}", name),
                        message: format!("name={:?} namespace={:?}", name, namespace),
                    });
                }
                format!("{}.{}", name, namespace)
            }
            other => {
                return Err(SpawnerError::UnsupportedConnectionKind {
                    kind: other.to_string(),
                });
            }
        };

        Ok((address, self.config.effective_port()))
    }

    /// Deploy the session and return the address to connect to
    ///
    /// The progress feed ends when this returns, whatever the outcome: the
    /// spawner's sender is dropped here, so a reader sees the end of the feed
    /// even if the `Finished` marker did not fit.
    pub async fn start(&mut self) -> Result<(String, u16)> {
        let progress_tx = match self.progress_tx.take() {
            Some(tx) if !tx.is_closed() => tx,
            _ => {
                let (tx, feed) = progress::channel(DEFAULT_CAPACITY);
                self.progress = Some(feed);
                tx
            }
        };

        self.phase = SessionPhase::Deploying;
        let result = self.deploy_and_connect(&progress_tx).await;

        match &result {
            Ok((ip, port)) => {
                info!("Started server on {}:{}", ip, port);
                self.phase = SessionPhase::Running;
            }
            Err(e) => {
                warn!(error = %e, "failed to start server");
                self.state.connection_manifest = None;
                self.phase = SessionPhase::Failed {
                    reason: e.to_string(),
                };
            }
        }

        progress::publish(Some(&progress_tx), ProgressEvent::Finished);
        result
    }

    async fn deploy_and_connect(&mut self, progress_tx: &ProgressSender) -> Result<(String, u16)> {
        let manifests = self.manifests().await?.to_vec();
        let summary = self
            .orchestrator
            .deploy_all(&manifests, Some(progress_tx.clone()))
            .await?;
        info!("Deployed: {}", summary.summary());

        let obj = self.connection_object().await?;
        self.connection_address(&obj)
    }

    /// Delete objects marked for deletion when the server stops
    pub async fn stop(&mut self) -> Result<OperationSummary> {
        self.teardown(DELETE_FOR_SERVER).await
    }

    /// Delete objects marked for deletion when the user is removed
    pub async fn delete_forever(&mut self) -> Result<OperationSummary> {
        self.teardown(DELETE_FOR_USER).await
    }

    /// Session state is reset whether or not the deletions succeed
    async fn teardown(&mut self, reason: &str) -> Result<OperationSummary> {
        self.phase = SessionPhase::Deleting;
        let required = BTreeMap::from([(
            self.config.deletion_annotation_key.clone(),
            reason.to_string(),
        )]);

        let result = self.delete_gated(&required).await;
        if let Ok(summary) = &result {
            info!("Deleted: {}", summary.summary());
        }
        self.reset();
        result
    }

    async fn delete_gated(
        &mut self,
        required: &BTreeMap<String, String>,
    ) -> Result<OperationSummary> {
        let manifests = self.manifests().await?.to_vec();
        Ok(self.orchestrator.delete_all(&manifests, required).await?)
    }

    /// `None` while the server is reachable, otherwise an exit status
    ///
    /// An empty session or a missing connection object counts as stopped
    /// with status 0.
    pub async fn poll(&mut self) -> Result<Option<i32>> {
        if self.state.is_empty() {
            return Ok(Some(0));
        }

        match self.connection_object().await {
            Ok(_) => Ok(None),
            Err(SpawnerError::Kube(e @ KubeError::UnexpectedState { .. })) => {
                warn!(error = %e, "Failed to get server");
                Ok(Some(0))
            }
            Err(e) if e.is_not_found() => {
                warn!(error = %e, "Failed to get server");
                Ok(Some(0))
            }
            Err(e) => Err(e),
        }
    }

    /// Take the consumer half of the progress feed
    ///
    /// After a start has consumed the previous feed, this opens a fresh one
    /// for the next start.
    pub fn take_progress(&mut self) -> Option<ProgressFeed> {
        if self.progress.is_none() && self.progress_tx.is_none() {
            let (tx, feed) = progress::channel(DEFAULT_CAPACITY);
            self.progress_tx = Some(tx);
            return Some(feed);
        }
        self.progress.take()
    }

    /// Snapshot of the persisted session state
    pub fn state(&self) -> SessionState {
        self.state.clone()
    }

    /// Restore a previously saved session
    pub fn load_state(&mut self, state: SessionState) {
        self.phase = SessionPhase::from_state(&state);
        self.state = state;
    }

    fn reset(&mut self) {
        self.state = SessionState::default();
        self.phase = SessionPhase::Empty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kubetemplate_kube::MockCluster;
    use serde_json::json;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Renderer returning fixed manifests
    #[derive(Clone)]
    struct StaticRenderer {
        manifests: Vec<Manifest>,
        renders: Arc<AtomicUsize>,
    }

    impl StaticRenderer {
        fn new(manifests: Vec<Manifest>) -> Self {
            Self {
                manifests,
                renders: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl TemplateRenderer for StaticRenderer {
        async fn render(
            &self,
            _template_path: &Path,
            _values: &BTreeMap<String, Value>,
        ) -> Result<Vec<Manifest>> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            Ok(self.manifests.clone())
        }
    }

    fn config() -> SpawnerConfig {
        let mut config = SpawnerConfig::new("/charts/server");
        config.namespace = "jupyter".to_string();
        config.timeout_seconds = 10;
        config
    }

    fn object(kind: &str, name: &str, annotations: Value, extra: Value) -> Manifest {
        let mut value = json!({
            "apiVersion": if kind == "Deployment" { "apps/v1" } else { "v1" },
            "kind": kind,
            "metadata": { "annotations": annotations, "name": name, "namespace": "jupyter" }
        });
        if let (Some(target), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
            target.extend(extra.clone());
        }
        Manifest::new(value)
    }

    fn server_manifests() -> Vec<Manifest> {
        vec![
            object(
                "PersistentVolumeClaim",
                "home",
                json!({ "kubetemplatespawner/delete": "user" }),
                json!({}),
            ),
            object(
                "Pod",
                "server",
                json!({
                    "kubetemplatespawner/delete": "server",
                    "kubetemplatespawner/connection": "true"
                }),
                json!({ "spec": { "containers": [] } }),
            ),
        ]
    }

    fn spawner(
        cluster: &MockCluster,
        manifests: Vec<Manifest>,
    ) -> (Spawner<StaticRenderer>, Arc<AtomicUsize>) {
        let renderer = StaticRenderer::new(manifests);
        let renders = renderer.renders.clone();
        let names = SessionNames::new(1, "alice", "").unwrap();
        let spawner = Spawner::new(config(), names, renderer, Arc::new(cluster.clone()))
            .with_poll_config(PollConfig {
                interval: Duration::from_secs(1),
            });
        (spawner, renders)
    }

    #[test]
    fn test_template_vars() {
        let cluster = MockCluster::new();
        let mut config = config();
        config.env.insert("JUPYTERHUB_API_TOKEN".to_string(), "secret".to_string());
        config.extra_vars.insert("port".to_string(), json!(9999));
        config.extra_vars.insert("image".to_string(), json!("jupyter/base"));
        let names = SessionNames::new(5, "Alice", "gpu").unwrap();
        let spawner = Spawner::new(
            config,
            names,
            StaticRenderer::new(vec![]),
            Arc::new(cluster),
        );

        let vars = spawner.template_vars();
        assert_eq!(vars["userid"], json!(5));
        assert_eq!(vars["unescaped_servername"], json!("gpu"));
        assert_eq!(vars["namespace"], json!("jupyter"));
        assert_eq!(vars["ip"], json!("0.0.0.0"));
        assert_eq!(vars["env"], json!({ "JUPYTERHUB_API_TOKEN": "secret" }));
        assert_eq!(vars["port"], json!(9999));
        assert_eq!(vars["image"], json!("jupyter/base"));
    }

    #[tokio::test]
    async fn test_manifests_rendered_once() {
        let cluster = MockCluster::new();
        let (mut spawner, renders) = spawner(&cluster, server_manifests());

        assert_eq!(spawner.manifests().await.unwrap().len(), 2);
        assert_eq!(spawner.manifests().await.unwrap().len(), 2);
        assert_eq!(renders.load(Ordering::SeqCst), 1);
        assert_eq!(spawner.phase(), &SessionPhase::Rendered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_pod_connection() {
        let cluster = MockCluster::new();
        cluster.ready_after("Pod", "server", 2);
        cluster.push_event("jupyter", "Pod", "server", "Pulling", "pulling image");
        let (mut spawner, _) = spawner(&cluster, server_manifests());
        let mut feed = spawner.take_progress().unwrap();

        let (ip, port) = spawner.start().await.unwrap();

        assert!(ip.starts_with("10.244.0."));
        assert_eq!(port, 8888);
        assert!(spawner.phase().is_running());
        assert!(spawner.state().connection_manifest.is_some());

        assert_eq!(
            feed.next().await.as_deref(),
            Some("Event: Pod/server Pulling - pulling image")
        );
        assert_eq!(feed.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_service_connection() {
        let cluster = MockCluster::new();
        let manifests = vec![
            object(
                "Service",
                "server",
                json!({ "kubetemplatespawner/connection": "true" }),
                json!({ "spec": { "ports": [{ "port": 8888 }] } }),
            ),
            object("Pod", "server", json!({}), json!({})),
        ];
        let (mut spawner, _) = spawner(&cluster, manifests);

        let (address, port) = spawner.start().await.unwrap();
        assert_eq!(address, "server.jupyter");
        assert_eq!(port, 8888);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_multiple_connections() {
        let cluster = MockCluster::new();
        let connection = json!({ "kubetemplatespawner/connection": "true" });
        let manifests = vec![
            object("Pod", "one", connection.clone(), json!({})),
            object("Pod", "two", connection, json!({})),
        ];
        let (mut spawner, _) = spawner(&cluster, manifests);

        let err = spawner.start().await.unwrap_err();
        assert!(matches!(
            err,
            SpawnerError::MultipleConnectionManifests { .. }
        ));
        assert!(spawner.phase().is_failed());
        assert!(spawner.state().connection_manifest.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_connection() {
        let cluster = MockCluster::new();
        let manifests = vec![object("Pod", "one", json!({}), json!({}))];
        let (mut spawner, _) = spawner(&cluster, manifests);

        let err = spawner.start().await.unwrap_err();
        assert!(matches!(err, SpawnerError::NoConnectionManifest { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_unsupported_connection_kind() {
        let cluster = MockCluster::new();
        let manifests = vec![object(
            "ConfigMap",
            "settings",
            json!({ "kubetemplatespawner/connection": "true" }),
            json!({ "data": {} }),
        )];
        let (mut spawner, _) = spawner(&cluster, manifests);

        let err = spawner.start().await.unwrap_err();
        assert!(matches!(
            err,
            SpawnerError::UnsupportedConnectionKind { ref kind } if kind == "ConfigMap"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_ends_when_full() {
        let cluster = MockCluster::new();
        cluster.ready_after("Pod", "server", 2);
        for i in 0..DEFAULT_CAPACITY + 44 {
            cluster.push_event("jupyter", "Pod", "server", "Pulling", &format!("attempt {i}"));
        }
        let (mut spawner, _) = spawner(&cluster, server_manifests());
        let mut feed = spawner.take_progress().unwrap();

        spawner.start().await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(60), async {
            let mut received = 0;
            while feed.next().await.is_some() {
                received += 1;
            }
            received
        })
        .await
        .expect("feed should end after start");
        assert_eq!(received, DEFAULT_CAPACITY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_gets_fresh_feed() {
        let cluster = MockCluster::new();
        let (mut spawner, _) = spawner(&cluster, server_manifests());
        let mut first = spawner.take_progress().unwrap();
        spawner.start().await.unwrap();
        assert_eq!(first.next().await, None);

        let mut second = spawner.take_progress().unwrap();
        spawner.start().await.unwrap();
        assert_eq!(second.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_readiness_timeout_fails() {
        let cluster = MockCluster::new();
        cluster.never_ready("Pod", "server");
        let (mut spawner, _) = spawner(&cluster, server_manifests());
        let mut feed = spawner.take_progress().unwrap();

        let err = spawner.start().await.unwrap_err();

        assert!(matches!(
            err,
            SpawnerError::Kube(KubeError::ReadinessTimeout { .. })
        ));
        assert!(spawner.phase().is_failed());
        assert!(spawner.state().connection_manifest.is_none());
        assert_eq!(feed.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_keeps_user_data() {
        let cluster = MockCluster::new();
        let (mut spawner, _) = spawner(&cluster, server_manifests());
        spawner.start().await.unwrap();

        let summary = spawner.stop().await.unwrap();

        assert_eq!(summary.succeeded, vec!["Pod/server"]);
        assert_eq!(summary.skipped.len(), 1);
        assert!(cluster.contains("PersistentVolumeClaim", "jupyter", "home"));
        assert!(!cluster.contains("Pod", "jupyter", "server"));
        assert!(spawner.state().is_empty());
        assert_eq!(spawner.phase(), &SessionPhase::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_forever_removes_user_data() {
        let cluster = MockCluster::new();
        let (mut spawner, renders) = spawner(&cluster, server_manifests());
        spawner.start().await.unwrap();
        spawner.stop().await.unwrap();

        let summary = spawner.delete_forever().await.unwrap();

        assert_eq!(summary.succeeded, vec!["PersistentVolumeClaim/home"]);
        assert!(!cluster.contains("PersistentVolumeClaim", "jupyter", "home"));
        // state was reset by stop, so the chart is rendered again
        assert_eq!(renders.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll() {
        let cluster = MockCluster::new();
        let (mut spawner, renders) = spawner(&cluster, server_manifests());

        assert_eq!(spawner.poll().await.unwrap(), Some(0));
        assert_eq!(renders.load(Ordering::SeqCst), 0);

        spawner.start().await.unwrap();
        assert_eq!(spawner.poll().await.unwrap(), None);

        let pods = cluster.discover("v1", "Pod").await.unwrap();
        pods.delete("server", "jupyter").await.unwrap();
        assert_eq!(spawner.poll().await.unwrap(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_state_resumes_session() {
        let cluster = MockCluster::new();
        let (mut first, _) = spawner(&cluster, server_manifests());
        first.start().await.unwrap();
        let saved = first.state();

        let (mut second, renders) = spawner(&cluster, vec![]);
        second.load_state(saved);

        assert!(second.phase().is_running());
        assert_eq!(second.poll().await.unwrap(), None);
        second.stop().await.unwrap();
        assert_eq!(renders.load(Ordering::SeqCst), 0);
        assert!(!cluster.contains("Pod", "jupyter", "server"));
    }

    #[test]
    fn test_state_snapshot() {
        let cluster = MockCluster::new();
        let (mut spawner, _) = spawner(&cluster, vec![]);
        let pod = object(
            "Pod",
            "server",
            json!({ "kubetemplatespawner/connection": "true" }),
            json!({}),
        );
        spawner.load_state(SessionState {
            manifests: vec![pod.clone()],
            connection_manifest: Some(pod),
        });

        insta::assert_snapshot!(spawner.state().to_json().unwrap(), @r###"
        {
          "manifests": [
            {
              "apiVersion": "v1",
              "kind": "Pod",
              "metadata": {
                "annotations": {
                  "kubetemplatespawner/connection": "true"
                },
                "name": "server",
                "namespace": "jupyter"
              }
            }
          ],
          "connection_manifest": {
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
              "annotations": {
                "kubetemplatespawner/connection": "true"
              },
              "name": "server",
              "namespace": "jupyter"
            }
          }
        }
        "###);
    }

    #[test]
    fn test_connection_address_pod_without_ip() {
        let cluster = MockCluster::new();
        let (spawner, _) = spawner(&cluster, vec![]);
        let obj: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "server", "namespace": "jupyter" },
            "status": { "phase": "Pending" }
        }))
        .unwrap();

        let err = spawner.connection_address(&obj).unwrap_err();
        assert!(matches!(err, SpawnerError::MissingAddress { .. }));
    }
}
