//! Session state files
//!
//! One JSON file per user server, by default under
//! `<data_dir>/kubetemplate/sessions/`. An empty session has no file.

use std::path::{Path, PathBuf};

use kubetemplate_spawner::{SessionNames, SessionState};

use crate::error::{CliError, Result};

/// Location of one session's saved state
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default file for a session, keyed by its escaped user/server name
    pub fn for_session(names: &SessionNames) -> Result<Self> {
        let data_dir = dirs::data_dir().ok_or_else(|| CliError::Other {
            message: "Could not determine data directory".to_string(),
        })?;
        Ok(Self::new(
            data_dir
                .join("kubetemplate")
                .join("sessions")
                .join(format!("{}.json", names.escaped_user_server())),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load saved state; a missing file is an empty session
    pub fn load(&self) -> Result<SessionState> {
        if !self.path.exists() {
            return Ok(SessionState::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(SessionState::from_json(&content)?)
    }

    /// Save state, removing the file once the session is empty
    pub fn save(&self, state: &SessionState) -> Result<()> {
        if state.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, state.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubetemplate_kube::Manifest;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty_session() {
        let dir = TempDir::new().unwrap();
        let file = StateFile::new(dir.path().join("alice.json"));
        assert!(file.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_load_and_clear() {
        let dir = TempDir::new().unwrap();
        let file = StateFile::new(dir.path().join("sessions").join("alice.json"));
        let state = SessionState {
            manifests: vec![Manifest::new(json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": { "name": "server" }
            }))],
            connection_manifest: None,
        };

        file.save(&state).unwrap();
        assert_eq!(file.load().unwrap(), state);

        file.save(&SessionState::default()).unwrap();
        assert!(!file.path().exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alice.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(StateFile::new(path).load().is_err());
    }
}
