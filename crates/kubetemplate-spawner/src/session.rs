//! Session state and lifecycle phases

use kubetemplate_kube::Manifest;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted state of one server session
///
/// Restoring it lets stop and poll work without rendering again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SessionState {
    /// Rendered manifests, fixed for the session's lifetime
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<Manifest>,

    /// The manifest marked as the connection endpoint, once selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_manifest: Option<Manifest>,
}

impl SessionState {
    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty() && self.connection_manifest.is_none()
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Where a session is in its lifecycle
///
/// `Empty → Rendered → Deploying → Running → Deleting → Empty`, with
/// `Deploying → Failed` when a deploy does not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SessionPhase {
    /// Nothing rendered
    Empty,

    /// Manifests rendered, nothing deployed by this process
    Rendered,

    /// Deploy in progress
    Deploying,

    /// Deployed and reachable
    Running,

    /// Teardown in progress
    Deleting,

    /// Deploy failed
    Failed { reason: String },
}

impl SessionPhase {
    /// Phase implied by restored state
    pub fn from_state(state: &SessionState) -> Self {
        if state.connection_manifest.is_some() {
            SessionPhase::Running
        } else if !state.manifests.is_empty() {
            SessionPhase::Rendered
        } else {
            SessionPhase::Empty
        }
    }

    /// Check if an operation is in flight
    pub fn is_pending(&self) -> bool {
        matches!(self, SessionPhase::Deploying | SessionPhase::Deleting)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, SessionPhase::Running)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SessionPhase::Failed { .. })
    }

    /// Get status string for display
    pub fn status_name(&self) -> &'static str {
        match self {
            SessionPhase::Empty => "empty",
            SessionPhase::Rendered => "rendered",
            SessionPhase::Deploying => "deploying",
            SessionPhase::Running => "running",
            SessionPhase::Deleting => "deleting",
            SessionPhase::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Failed { reason } => write!(f, "failed: {}", reason),
            other => f.write_str(other.status_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod() -> Manifest {
        Manifest::new(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "web" }
        }))
    }

    #[test]
    fn test_empty_state_serializes_to_empty_object() {
        let state = SessionState::default();
        assert!(state.is_empty());
        assert_eq!(serde_json::to_value(&state).unwrap(), json!({}));
    }

    #[test]
    fn test_state_json_roundtrip() {
        let state = SessionState {
            manifests: vec![pod()],
            connection_manifest: Some(pod()),
        };
        let json = state.to_json().unwrap();
        assert!(json.contains("connection_manifest"));
        assert_eq!(SessionState::from_json(&json).unwrap(), state);
    }

    #[test]
    fn test_state_ignores_unknown_fields() {
        let state = SessionState::from_json(r#"{"manifests": [], "pid": 0}"#).unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn test_phase_from_state() {
        assert_eq!(
            SessionPhase::from_state(&SessionState::default()),
            SessionPhase::Empty
        );

        let rendered = SessionState {
            manifests: vec![pod()],
            connection_manifest: None,
        };
        assert_eq!(SessionPhase::from_state(&rendered), SessionPhase::Rendered);

        let running = SessionState {
            manifests: vec![pod()],
            connection_manifest: Some(pod()),
        };
        assert!(SessionPhase::from_state(&running).is_running());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SessionPhase::Deploying.to_string(), "deploying");
        assert!(SessionPhase::Deleting.is_pending());
        let failed = SessionPhase::Failed {
            reason: "timeout".to_string(),
        };
        assert!(failed.is_failed());
        assert_eq!(failed.to_string(), "failed: timeout");
    }
}
