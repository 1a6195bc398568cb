//! KubeTemplate Kube - manifest lifecycle on a Kubernetes cluster
//!
//! This crate provides:
//! - **Cluster Access**: dynamic get/create/patch/delete/watch behind a trait, with a kube-rs
//!   implementation and an in-memory mock
//! - **Reconciler**: create-or-patch of rendered manifests
//! - **Readiness**: per-kind readiness rules and a fixed-cadence poller
//! - **Gated Deletion**: annotation-authorized deletes with optional confirmation
//! - **Event Stream**: namespace events about a deployment forwarded to a progress feed
//! - **Orchestrator**: concurrent deploy and teardown of whole manifest sets

pub mod cluster;
pub mod delete;
pub mod error;
pub mod events;
pub mod manifest;
pub mod orchestrator;
pub mod progress;
pub mod readiness;
pub mod reconcile;
pub mod resolver;

pub use cluster::{Cluster, KubeCluster, Lookup, MockCluster, OperationCounts, ResourceClient};
pub use delete::{DeleteOutcome, DeleteResult, Deleter, missing_annotation};
pub use error::{KubeError, Result};
pub use events::{EventStream, format_event};
pub use manifest::{DEFAULT_NAMESPACE, Manifest, ResourceId, gvk_from_type_meta};
pub use orchestrator::{DEFAULT_TIMEOUT_SECS, OperationSummary, Orchestrator};
pub use progress::{ProgressEvent, ProgressFeed, ProgressSender};
pub use readiness::{PollConfig, ReadinessPoller, is_ready, object_is_ready};
pub use reconcile::{ApplyResult, Reconciler};
pub use resolver::TypeResolver;
