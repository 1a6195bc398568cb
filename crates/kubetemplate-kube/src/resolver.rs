//! Cached resource type lookup

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::cluster::{Cluster, ResourceClient};
use crate::error::Result;

type TypeKey = (String, String);

/// Resolves apiVersion/kind pairs to resource clients
///
/// Successful lookups are cached for the lifetime of the resolver so a
/// batch touching many objects of one kind only discovers it once. Failed
/// lookups are not cached.
pub struct TypeResolver {
    cluster: Arc<dyn Cluster>,
    cache: RwLock<HashMap<TypeKey, Arc<dyn ResourceClient>>>,
}

impl TypeResolver {
    pub fn new(cluster: Arc<dyn Cluster>) -> Self {
        Self {
            cluster,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a type, discovering it on first use
    pub async fn resolve(&self, api_version: &str, kind: &str) -> Result<Arc<dyn ResourceClient>> {
        let key = (api_version.to_string(), kind.to_string());

        if let Some(client) = self
            .cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Ok(client.clone());
        }

        debug!(api_version, kind, "discovering resource type");
        let client = self.cluster.discover(api_version, kind).await?;

        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key)
            .or_insert_with(|| client.clone());

        Ok(client)
    }

    /// Number of resolved types held in the cache
    pub fn cached_types(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
