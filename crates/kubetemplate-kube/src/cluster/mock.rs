//! In-memory cluster for testing
//!
//! Objects live in a map keyed by kind, namespace and name. Readiness,
//! transient failures, slow deletions and namespace events can be scripted
//! per object, so the orchestrator can be exercised without a cluster.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use kube::api::DynamicObject;
use kube::core::TypeMeta;
use serde_json::{Map, Value, json};

use super::{Cluster, Lookup, ResourceClient};
use crate::error::{KubeError, Result};
use crate::manifest::Manifest;

type ObjectKey = (String, String, String);
type NameKey = (String, String);

/// When a workload object reports ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadyPolicy {
    Immediately,
    AfterGets(u32),
    Never,
}

#[derive(Debug, Clone)]
struct MockObject {
    obj: DynamicObject,
    gets_since_create: u32,
    ready: bool,
    /// Remaining gets before a deleted object disappears
    terminating: Option<u32>,
}

#[derive(Default)]
struct MockState {
    types: BTreeSet<NameKey>,
    objects: HashMap<ObjectKey, MockObject>,
    ready_policies: HashMap<NameKey, ReadyPolicy>,
    failing_gets: HashMap<NameKey, u32>,
    failing_get_numbers: HashMap<NameKey, BTreeSet<u32>>,
    linger: HashMap<NameKey, u32>,
    get_counts: HashMap<NameKey, u32>,
    events: Vec<DynamicObject>,
    watch_refused: bool,
    watch_interrupted: bool,
    watch_held_open: bool,
    next_address: u32,
    resource_version: u64,
    operations: OperationCounts,
}

impl MockState {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn next_address(&mut self, prefix: &str) -> String {
        self.next_address += 1;
        format!("{}.{}", prefix, self.next_address)
    }
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub discoveries: usize,
    pub gets: usize,
    pub creates: usize,
    pub patches: usize,
    pub deletes: usize,
    pub watches: usize,
}

/// In-memory control plane
#[derive(Clone)]
pub struct MockCluster {
    state: Arc<RwLock<MockState>>,
}

impl MockCluster {
    /// Create a cluster serving the core workload and config types
    pub fn new() -> Self {
        let cluster = Self {
            state: Arc::new(RwLock::new(MockState::default())),
        };
        for kind in [
            "ConfigMap",
            "Secret",
            "Service",
            "Pod",
            "PersistentVolumeClaim",
            "Event",
        ] {
            cluster.with_type("v1", kind);
        }
        for kind in ["Deployment", "DaemonSet", "StatefulSet"] {
            cluster.with_type("apps/v1", kind);
        }
        cluster
    }

    fn lock(&self) -> RwLockWriteGuard<'_, MockState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Serve an additional resource type
    pub fn with_type(&self, api_version: &str, kind: &str) -> &Self {
        self.lock()
            .types
            .insert((api_version.to_string(), kind.to_string()));
        self
    }

    /// Seed an existing object without counting a create
    pub fn insert(&self, manifest: &Manifest) -> Result<DynamicObject> {
        let mut state = self.lock();
        let namespace = manifest
            .namespace()
            .unwrap_or(crate::manifest::DEFAULT_NAMESPACE)
            .to_string();
        let api_version = manifest.api_version().unwrap_or("v1").to_string();
        let kind = manifest.kind().unwrap_or_default().to_string();
        store_new(&mut state, &api_version, &kind, &namespace, manifest)
    }

    /// Store an arbitrary payload under a kind/namespace/name key
    ///
    /// Used to simulate the API server answering with something other than
    /// the requested kind, such as a `Status` object.
    pub fn insert_raw(&self, kind: &str, namespace: &str, name: &str, obj: DynamicObject) {
        self.lock().objects.insert(
            key(kind, namespace, name),
            MockObject {
                obj,
                gets_since_create: 0,
                ready: true,
                terminating: None,
            },
        );
    }

    /// Current stored object, without counting a get
    pub fn object(&self, kind: &str, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.lock()
            .objects
            .get(&key(kind, namespace, name))
            .map(|o| o.obj.clone())
    }

    pub fn contains(&self, kind: &str, namespace: &str, name: &str) -> bool {
        self.lock()
            .objects
            .contains_key(&key(kind, namespace, name))
    }

    /// Count stored objects
    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Number of gets issued for one object
    pub fn get_count(&self, kind: &str, name: &str) -> u32 {
        self.lock()
            .get_counts
            .get(&name_key(kind, name))
            .copied()
            .unwrap_or(0)
    }

    /// Report ready on the `gets`-th fetch after creation
    pub fn ready_after(&self, kind: &str, name: &str, gets: u32) {
        self.lock()
            .ready_policies
            .insert(name_key(kind, name), ReadyPolicy::AfterGets(gets));
    }

    /// Never report ready
    pub fn never_ready(&self, kind: &str, name: &str) {
        self.lock()
            .ready_policies
            .insert(name_key(kind, name), ReadyPolicy::Never);
    }

    /// Fail the next `count` fetches of an object
    pub fn fail_gets(&self, kind: &str, name: &str, count: u32) {
        self.lock().failing_gets.insert(name_key(kind, name), count);
    }

    /// Fail only the `nth` fetch of an object, counting from 1
    pub fn fail_nth_get(&self, kind: &str, name: &str, nth: u32) {
        self.lock()
            .failing_get_numbers
            .entry(name_key(kind, name))
            .or_default()
            .insert(nth);
    }

    /// Keep a deleted object visible for `gets` more fetches
    pub fn linger_after_delete(&self, kind: &str, name: &str, gets: u32) {
        self.lock().linger.insert(name_key(kind, name), gets);
    }

    /// Record a namespace event about an object
    pub fn push_event(&self, namespace: &str, kind: &str, name: &str, reason: &str, message: &str) {
        let mut state = self.lock();
        let seq = state.events.len();
        let value = json!({
            "apiVersion": "v1",
            "kind": "Event",
            "metadata": {
                "name": format!("{}.{}", name, seq),
                "namespace": namespace,
            },
            "involvedObject": {
                "kind": kind,
                "name": name,
                "namespace": namespace,
            },
            "reason": reason,
            "message": message,
            "type": "Normal",
        });
        if let Ok(event) = serde_json::from_value(value) {
            state.events.push(event);
        }
    }

    /// Reject watch requests outright
    pub fn fail_watch(&self) {
        self.lock().watch_refused = true;
    }

    /// End watch streams with an error after the recorded events
    pub fn interrupt_watch(&self) {
        self.lock().watch_interrupted = true;
    }

    /// Keep watch streams open after the recorded events until dropped
    pub fn hold_watch_open(&self) {
        self.lock().watch_held_open = true;
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.lock().operations.clone()
    }
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cluster for MockCluster {
    async fn discover(&self, api_version: &str, kind: &str) -> Result<Arc<dyn ResourceClient>> {
        let mut state = self.lock();
        state.operations.discoveries += 1;

        if !state
            .types
            .contains(&(api_version.to_string(), kind.to_string()))
        {
            return Err(KubeError::ResourceTypeNotFound {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
            });
        }

        Ok(Arc::new(MockResource {
            state: self.state.clone(),
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        }))
    }
}

struct MockResource {
    state: Arc<RwLock<MockState>>,
    api_version: String,
    kind: String,
}

impl MockResource {
    fn lock(&self) -> RwLockWriteGuard<'_, MockState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ResourceClient for MockResource {
    fn api_version(&self) -> &str {
        &self.api_version
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    async fn get(&self, name: &str, namespace: &str) -> Result<Lookup> {
        let mut state = self.lock();
        state.operations.gets += 1;
        let nk = name_key(&self.kind, name);
        let count = {
            let count = state.get_counts.entry(nk.clone()).or_default();
            *count += 1;
            *count
        };

        if state
            .failing_get_numbers
            .get(&nk)
            .is_some_and(|numbers| numbers.contains(&count))
        {
            return Err(KubeError::Cluster(format!(
                "simulated connection reset fetching {}/{}",
                self.kind, name
            )));
        }

        if let Some(remaining) = state.failing_gets.get_mut(&nk)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(KubeError::Cluster(format!(
                "simulated transient failure fetching {}/{}",
                self.kind, name
            )));
        }

        let object_key = key(&self.kind, namespace, name);
        let policy = state
            .ready_policies
            .get(&nk)
            .copied()
            .unwrap_or(ReadyPolicy::Immediately);

        let Some(entry) = state.objects.get_mut(&object_key) else {
            return Ok(Lookup::NotFound);
        };

        if let Some(remaining) = entry.terminating {
            if remaining == 0 {
                state.objects.remove(&object_key);
                return Ok(Lookup::NotFound);
            }
            entry.terminating = Some(remaining - 1);
        }

        entry.gets_since_create += 1;
        let becomes_ready = !entry.ready
            && match policy {
                ReadyPolicy::Immediately => true,
                ReadyPolicy::AfterGets(n) => entry.gets_since_create >= n,
                ReadyPolicy::Never => false,
            };

        if becomes_ready {
            let address = state.next_address("10.244.0");
            let entry = state
                .objects
                .get_mut(&object_key)
                .ok_or_else(|| KubeError::Cluster("object vanished".to_string()))?;
            mark_ready(&mut entry.obj, &address);
            entry.ready = true;
            return Ok(Lookup::Found(entry.obj.clone()));
        }

        Ok(Lookup::Found(entry.obj.clone()))
    }

    async fn create(&self, namespace: &str, manifest: &Manifest) -> Result<DynamicObject> {
        let mut state = self.lock();
        state.operations.creates += 1;
        store_new(&mut state, &self.api_version, &self.kind, namespace, manifest)
    }

    async fn patch(
        &self,
        name: &str,
        namespace: &str,
        manifest: &Manifest,
    ) -> Result<DynamicObject> {
        let mut state = self.lock();
        state.operations.patches += 1;
        let resource_version = state.next_resource_version();

        let entry = state
            .objects
            .get_mut(&key(&self.kind, namespace, name))
            .ok_or_else(|| KubeError::ObjectNotFound {
                kind: self.kind.clone(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            })?;

        let mut value = serde_json::to_value(&entry.obj)?;
        let before = desired_state(&value);
        merge_patch(&mut value, manifest.as_value());
        let changed = desired_state(&value) != before;

        let mut patched: DynamicObject = serde_json::from_value(value)?;
        if changed {
            patched.metadata.generation = Some(patched.metadata.generation.unwrap_or(1) + 1);
        }
        patched.metadata.resource_version = Some(resource_version);
        entry.obj = patched;

        Ok(entry.obj.clone())
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<()> {
        let mut state = self.lock();
        state.operations.deletes += 1;
        let object_key = key(&self.kind, namespace, name);
        let linger = state.linger.get(&name_key(&self.kind, name)).copied();

        if !state.objects.contains_key(&object_key) {
            return Err(KubeError::ObjectNotFound {
                kind: self.kind.clone(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            });
        }

        match linger {
            Some(gets) if gets > 0 => {
                if let Some(entry) = state.objects.get_mut(&object_key) {
                    entry.terminating.get_or_insert(gets);
                }
            }
            _ => {
                state.objects.remove(&object_key);
            }
        }
        Ok(())
    }

    async fn watch(
        &self,
        namespace: &str,
        _timeout_secs: u32,
    ) -> Result<BoxStream<'static, Result<DynamicObject>>> {
        let mut state = self.lock();
        state.operations.watches += 1;

        if state.watch_refused {
            return Err(KubeError::Cluster("watch refused".to_string()));
        }

        let events: Vec<Result<DynamicObject>> = state
            .events
            .iter()
            .filter(|e| e.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .map(Ok)
            .collect();

        let mut stream = stream::iter(events).boxed();
        if state.watch_interrupted {
            stream = stream
                .chain(stream::once(async {
                    Err(KubeError::Cluster("watch stream interrupted".to_string()))
                }))
                .boxed();
        }
        if state.watch_held_open {
            stream = stream.chain(stream::pending()).boxed();
        }

        Ok(stream)
    }
}

fn key(kind: &str, namespace: &str, name: &str) -> ObjectKey {
    (kind.to_string(), namespace.to_string(), name.to_string())
}

fn name_key(kind: &str, name: &str) -> NameKey {
    (kind.to_string(), name.to_string())
}

/// Build a freshly created object the way an API server would
fn store_new(
    state: &mut MockState,
    api_version: &str,
    kind: &str,
    namespace: &str,
    manifest: &Manifest,
) -> Result<DynamicObject> {
    let mut obj: DynamicObject = serde_json::from_value(manifest.as_value().clone())?;
    let name = obj
        .metadata
        .name
        .clone()
        .ok_or_else(|| KubeError::MalformedManifest(format!("{} is missing metadata.name", kind)))?;

    let object_key = key(kind, namespace, &name);
    if state.objects.contains_key(&object_key) {
        return Err(KubeError::Cluster(format!(
            "{}/{} already exists in namespace '{}'",
            kind, name, namespace
        )));
    }

    let resource_version = state.next_resource_version();
    obj.types = Some(TypeMeta {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
    });
    obj.metadata.namespace = Some(namespace.to_string());
    obj.metadata.uid = Some(format!("mock-{}", resource_version));
    obj.metadata.generation = Some(1);
    obj.metadata.resource_version = Some(resource_version);

    match kind {
        "Service" => {
            let address = state.next_address("10.96.0");
            let spec = ensure_object(&mut obj.data, "spec");
            if !spec.contains_key("clusterIP") {
                spec.insert("clusterIP".to_string(), json!(address));
            }
        }
        "Pod" => {
            ensure_object(&mut obj.data, "status").insert("phase".to_string(), json!("Pending"));
        }
        "DaemonSet" => {
            let status = ensure_object(&mut obj.data, "status");
            status.insert("desiredNumberScheduled".to_string(), json!(1));
            status.insert("numberReady".to_string(), json!(0));
        }
        _ => {}
    }

    state.objects.insert(
        object_key,
        MockObject {
            obj: obj.clone(),
            gets_since_create: 0,
            ready: false,
            terminating: None,
        },
    );
    Ok(obj)
}

/// Fill in the status a healthy controller would report
fn mark_ready(obj: &mut DynamicObject, address: &str) {
    let generation = obj.metadata.generation;
    let kind = obj.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
    match kind.as_str() {
        "Pod" => {
            obj.data["status"] = json!({
                "phase": "Running",
                "podIP": address,
                "conditions": [{ "type": "Ready", "status": "True" }],
            });
        }
        "Deployment" => {
            obj.data["status"] = json!({
                "observedGeneration": generation,
                "replicas": 1,
                "readyReplicas": 1,
                "availableReplicas": 1,
                "conditions": [{ "type": "Available", "status": "True" }],
            });
        }
        "DaemonSet" => {
            obj.data["status"] = json!({
                "observedGeneration": generation,
                "desiredNumberScheduled": 1,
                "numberReady": 1,
                "currentNumberScheduled": 1,
                "numberMisscheduled": 0,
            });
        }
        _ => {}
    }
}

fn ensure_object<'a>(data: &'a mut Value, field: &str) -> &'a mut Map<String, Value> {
    if !data[field].is_object() {
        data[field] = Value::Object(Map::new());
    }
    match &mut data[field] {
        Value::Object(inner) => inner,
        _ => unreachable!("field was just made an object"),
    }
}

/// Object content that drives the generation counter
fn desired_state(value: &Value) -> Value {
    let mut value = value.clone();
    if let Some(map) = value.as_object_mut() {
        map.remove("metadata");
        map.remove("status");
    }
    value
}

/// RFC 7386 JSON merge patch
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (k, v) in patch_map {
            if v.is_null() {
                target_map.remove(k);
            } else {
                merge_patch(target_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
    }
}
