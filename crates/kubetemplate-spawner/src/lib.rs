//! KubeTemplate Spawner - per-user servers from a Helm chart
//!
//! This crate provides:
//! - **Configuration**: chart location, annotation keys, timeouts and extra template values
//! - **Names**: raw and Kubernetes-safe user and server names for templates
//! - **Rendering**: `helm template` behind a renderer trait
//! - **Sessions**: start, stop, delete-forever and poll for one server, with
//!   persistable state and a progress feed

pub mod config;
pub mod error;
pub mod names;
pub mod renderer;
pub mod session;
pub mod spawner;

pub use config::{DEFAULT_PORT, SpawnerConfig};
pub use error::{Result, SpawnerError};
pub use names::{SLUG_MAX_LENGTH, SessionNames, multi_slug, safe_slug, validate_server_name};
pub use renderer::{HelmRenderer, TemplateRenderer};
pub use session::{SessionPhase, SessionState};
pub use spawner::{DELETE_FOR_SERVER, DELETE_FOR_USER, Spawner, template_values};
