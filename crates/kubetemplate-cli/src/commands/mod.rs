//! CLI commands

pub mod delete;
pub mod poll;
pub mod render;
pub mod start;
pub mod stop;

use std::path::Path;
use std::sync::Arc;

use clap::Args;
use kubetemplate_kube::KubeCluster;
use kubetemplate_spawner::{SessionNames, SessionState, Spawner, SpawnerConfig};

use crate::error::{CliError, Result};
use crate::state::StateFile;

/// Identifies the user server a command acts on
#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// User the server belongs to
    #[arg(short, long, env = "KUBETEMPLATE_USER")]
    pub user: String,

    /// Numeric user id passed to the template
    #[arg(long, default_value_t = 0)]
    pub user_id: u64,

    /// Server name, empty for the user's default server
    #[arg(short, long, default_value = "")]
    pub server: String,
}

/// Everything a command needs before talking to the cluster
pub struct Context {
    pub config: SpawnerConfig,
    pub names: SessionNames,
    pub state_file: StateFile,
}

impl Context {
    pub fn load(
        config_path: Option<&Path>,
        state_path: Option<&Path>,
        session: &SessionArgs,
    ) -> Result<Self> {
        let config = load_config(config_path)?;
        let names = SessionNames::new(session.user_id, session.user.clone(), session.server.clone())?;
        let state_file = match state_path {
            Some(path) => StateFile::new(path),
            None => StateFile::for_session(&names)?,
        };

        Ok(Self {
            config,
            names,
            state_file,
        })
    }

    /// Connect to the cluster and restore the saved session
    pub async fn spawner(&self, state: SessionState) -> Result<Spawner> {
        let cluster = KubeCluster::try_default().await?;
        let mut spawner = Spawner::with_helm(self.config.clone(), self.names.clone(), Arc::new(cluster));
        spawner.load_state(state);
        Ok(spawner)
    }
}

fn load_config(path: Option<&Path>) -> Result<SpawnerConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => SpawnerConfig::default_path()?,
    };

    if !path.exists() {
        return Err(CliError::config_with_help(
            format!("config file not found: {}", path.display()),
            "create it with at least `templatePath: /path/to/chart`",
        ));
    }

    let config = SpawnerConfig::load_from(&path)?;
    config.validate()?;
    Ok(config)
}
