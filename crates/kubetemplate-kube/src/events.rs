//! Forwarding of cluster events about a deployment
//!
//! Events are telemetry: a failing watch is logged and the stream simply
//! ends, it never fails the deployment it accompanies.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use futures::StreamExt;
use kube::api::DynamicObject;
use serde_json::Value;
use tracing::{error, info};

use crate::error::{KubeError, Result};
use crate::manifest::ResourceId;
use crate::progress::{ProgressEvent, ProgressSender, publish};
use crate::resolver::TypeResolver;

const EVENT_API_VERSION: &str = "v1";
const EVENT_KIND: &str = "Event";

/// Watches namespace events for a fixed set of objects
#[derive(Clone)]
pub struct EventStream {
    resolver: Arc<TypeResolver>,
}

impl EventStream {
    pub fn new(resolver: Arc<TypeResolver>) -> Self {
        Self { resolver }
    }

    /// Forward events about `ids` to `observer` until the watch ends
    ///
    /// All ids must share one namespace. Returns once the server-side
    /// timeout elapses or the watch fails.
    pub async fn run(
        &self,
        observer: Option<ProgressSender>,
        ids: &[ResourceId],
        timeout_secs: u64,
    ) -> Result<()> {
        let Some(namespace) = single_namespace(ids)? else {
            return Ok(());
        };
        let wanted: HashSet<(&str, &str)> = ids
            .iter()
            .map(|id| (id.kind.as_str(), id.name.as_str()))
            .collect();

        if let Err(e) = self
            .forward(observer.as_ref(), &namespace, &wanted, timeout_secs)
            .await
        {
            error!(namespace = %namespace, error = %e, "event watch error");
        }
        Ok(())
    }

    async fn forward(
        &self,
        observer: Option<&ProgressSender>,
        namespace: &str,
        wanted: &HashSet<(&str, &str)>,
        timeout_secs: u64,
    ) -> Result<()> {
        let client = self.resolver.resolve(EVENT_API_VERSION, EVENT_KIND).await?;
        let timeout = u32::try_from(timeout_secs).unwrap_or(u32::MAX);
        let mut events = client.watch(namespace, timeout).await?;

        while let Some(event) = events.next().await {
            let event = event?;
            let Some((kind, name)) = involved_object(&event) else {
                continue;
            };
            if !wanted.contains(&(kind, name)) {
                continue;
            }
            let line = format_event(&event);
            info!("{}", line);
            publish(observer, ProgressEvent::message(line));
        }
        Ok(())
    }
}

/// The one namespace shared by `ids`, or `None` when there are no ids
pub fn single_namespace(ids: &[ResourceId]) -> Result<Option<String>> {
    let namespaces: BTreeSet<&str> = ids.iter().map(|id| id.namespace.as_str()).collect();
    match namespaces.len() {
        0 => Ok(None),
        1 => Ok(namespaces.into_iter().next().map(str::to_string)),
        _ => Err(KubeError::MixedNamespace {
            namespaces: namespaces.into_iter().map(str::to_string).collect(),
        }),
    }
}

fn involved_object(event: &DynamicObject) -> Option<(&str, &str)> {
    let involved = event.data.get("involvedObject")?;
    let kind = involved.get("kind").and_then(Value::as_str)?;
    let name = involved.get("name").and_then(Value::as_str)?;
    Some((kind, name))
}

/// Render an event as `Event: Kind/name Reason - message`
pub fn format_event(event: &DynamicObject) -> String {
    let field = |name: &str| event.data.get(name).and_then(Value::as_str).unwrap_or_default();
    let (kind, name) = involved_object(event).unwrap_or_default();
    format!(
        "Event: {}/{} {} - {}",
        kind,
        name,
        field("reason"),
        field("message")
    )
}
