//! kube-rs backed cluster access using dynamic objects

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams, WatchEvent, WatchParams},
    discovery::{self, ApiCapabilities, ApiResource, Scope},
};

use super::{Cluster, Lookup, ResourceClient};
use crate::error::{KubeError, Result};
use crate::manifest::{Manifest, gvk_from_type_meta};

/// Upper bound the API server accepts for a watch timeout
const MAX_WATCH_TIMEOUT_SECS: u32 = 290;

/// Cluster access through a kube-rs [`Client`]
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Connect using the in-cluster config or the local kubeconfig
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    /// Create from an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Get the underlying Kubernetes client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn discover(&self, api_version: &str, kind: &str) -> Result<Arc<dyn ResourceClient>> {
        let gvk = gvk_from_type_meta(&kube::core::TypeMeta {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        });

        match discovery::pinned_kind(&self.client, &gvk).await {
            Ok((api_resource, capabilities)) => Ok(Arc::new(KubeResource {
                client: self.client.clone(),
                api_version: api_version.to_string(),
                kind: kind.to_string(),
                api_resource,
                capabilities,
            })),
            Err(kube::Error::Discovery(_)) => Err(KubeError::ResourceTypeNotFound {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
            }),
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                Err(KubeError::ResourceTypeNotFound {
                    api_version: api_version.to_string(),
                    kind: kind.to_string(),
                })
            }
            Err(e) => Err(KubeError::Api(e)),
        }
    }
}

/// Dynamic API handle for one discovered resource type
struct KubeResource {
    client: Client,
    api_version: String,
    kind: String,
    api_resource: ApiResource,
    capabilities: ApiCapabilities,
}

impl KubeResource {
    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        if self.capabilities.scope == Scope::Namespaced {
            Api::namespaced_with(self.client.clone(), namespace, &self.api_resource)
        } else {
            Api::all_with(self.client.clone(), &self.api_resource)
        }
    }
}

#[async_trait]
impl ResourceClient for KubeResource {
    fn api_version(&self) -> &str {
        &self.api_version
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    async fn get(&self, name: &str, namespace: &str) -> Result<Lookup> {
        let obj = self.api(namespace).get_opt(name).await?;
        Ok(Lookup::from(obj))
    }

    async fn create(&self, namespace: &str, manifest: &Manifest) -> Result<DynamicObject> {
        let obj: DynamicObject = serde_json::from_value(manifest.as_value().clone())?;
        let created = self
            .api(namespace)
            .create(&PostParams::default(), &obj)
            .await?;
        Ok(created)
    }

    async fn patch(
        &self,
        name: &str,
        namespace: &str,
        manifest: &Manifest,
    ) -> Result<DynamicObject> {
        let patched = self
            .api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(manifest.as_value()))
            .await?;
        Ok(patched)
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<()> {
        let params = DeleteParams {
            propagation_policy: Some(kube::api::PropagationPolicy::Background),
            ..Default::default()
        };
        self.api(namespace).delete(name, &params).await?;
        Ok(())
    }

    async fn watch(
        &self,
        namespace: &str,
        timeout_secs: u32,
    ) -> Result<BoxStream<'static, Result<DynamicObject>>> {
        let params = WatchParams::default().timeout(timeout_secs.clamp(1, MAX_WATCH_TIMEOUT_SECS));
        let stream = self.api(namespace).watch(&params, "0").await?;

        let objects = stream.filter_map(|event| async move {
            match event {
                Ok(WatchEvent::Added(obj)) | Ok(WatchEvent::Modified(obj)) => Some(Ok(obj)),
                Ok(WatchEvent::Deleted(_)) | Ok(WatchEvent::Bookmark(_)) => None,
                Ok(WatchEvent::Error(resp)) => Some(Err(KubeError::Api(kube::Error::Api(resp)))),
                Err(e) => Some(Err(KubeError::Api(e))),
            }
        });

        Ok(objects.boxed())
    }
}
