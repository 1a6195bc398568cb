//! Access to the control plane
//!
//! Everything the orchestrator does against the cluster goes through two
//! traits:
//! - [`Cluster`]: resolves an apiVersion/kind pair to a [`ResourceClient`]
//! - [`ResourceClient`]: get/create/patch/delete/watch for one resource type
//!
//! [`KubeCluster`] talks to a real API server through kube-rs dynamic
//! objects. [`MockCluster`] keeps objects in memory for tests.

mod kube_cluster;
mod mock;

pub use kube_cluster::KubeCluster;
pub use mock::{MockCluster, OperationCounts};

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use kube::api::DynamicObject;

use crate::error::Result;
use crate::manifest::Manifest;

/// Kind reported by the API server for error payloads
pub const STATUS_KIND: &str = "Status";

/// Outcome of fetching a single object
#[derive(Debug, Clone)]
pub enum Lookup {
    Found(DynamicObject),
    NotFound,
}

impl Lookup {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn object(&self) -> Option<&DynamicObject> {
        match self {
            Lookup::Found(obj) => Some(obj),
            Lookup::NotFound => None,
        }
    }

    pub fn into_object(self) -> Option<DynamicObject> {
        match self {
            Lookup::Found(obj) => Some(obj),
            Lookup::NotFound => None,
        }
    }
}

impl From<Option<DynamicObject>> for Lookup {
    fn from(obj: Option<DynamicObject>) -> Self {
        obj.map_or(Lookup::NotFound, Lookup::Found)
    }
}

/// Kind string carried by a fetched object, if any
pub fn object_kind(obj: &DynamicObject) -> Option<&str> {
    obj.types.as_ref().map(|t| t.kind.as_str())
}

/// Resolves resource types on a control plane
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Look up the resource type served for `api_version`/`kind`
    ///
    /// Fails with [`KubeError::ResourceTypeNotFound`](crate::KubeError::ResourceTypeNotFound)
    /// when the control plane does not serve it.
    async fn discover(&self, api_version: &str, kind: &str) -> Result<Arc<dyn ResourceClient>>;
}

/// Operations against one resource type
#[async_trait]
pub trait ResourceClient: Send + Sync {
    fn api_version(&self) -> &str;

    fn kind(&self) -> &str;

    /// Fetch an object; a missing object is [`Lookup::NotFound`], not an error
    async fn get(&self, name: &str, namespace: &str) -> Result<Lookup>;

    async fn create(&self, namespace: &str, manifest: &Manifest) -> Result<DynamicObject>;

    /// Apply `manifest` as a JSON merge patch
    async fn patch(&self, name: &str, namespace: &str, manifest: &Manifest)
    -> Result<DynamicObject>;

    async fn delete(&self, name: &str, namespace: &str) -> Result<()>;

    /// Watch objects of this type in `namespace`
    ///
    /// The stream yields added and modified objects and ends once the
    /// server-side timeout elapses.
    async fn watch(
        &self,
        namespace: &str,
        timeout_secs: u32,
    ) -> Result<BoxStream<'static, Result<DynamicObject>>>;
}
