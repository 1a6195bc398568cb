//! CLI error types with exit code handling
//!
//! This module provides a unified error type for CLI operations that
//! maps errors to appropriate exit codes.

use kubetemplate_spawner::SpawnerError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {message}")]
    #[diagnostic(code(kubetemplate::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Template rendering failed
    #[error("Template error: {message}")]
    #[diagnostic(code(kubetemplate::cli::template))]
    Template {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Cluster operation failed
    #[error("Cluster error: {message}")]
    #[diagnostic(code(kubetemplate::cli::cluster))]
    Cluster { message: String },

    /// Invalid command line input
    #[error("Invalid input: {message}")]
    #[diagnostic(code(kubetemplate::cli::input))]
    Input { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(kubetemplate::cli::io))]
    Io { message: String },

    /// Wrapped error for passthrough (stores the formatted message)
    #[error("{message}")]
    #[diagnostic(code(kubetemplate::cli::error))]
    Other { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::Template { .. } => exit_codes::TEMPLATE_ERROR,
            CliError::Cluster { .. } => exit_codes::CLUSTER_ERROR,
            CliError::Input { .. } => exit_codes::ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Other { .. } => exit_codes::ERROR,
        }
    }

    /// Create a configuration error with help text
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

impl From<SpawnerError> for CliError {
    fn from(err: SpawnerError) -> Self {
        let message = err.to_string();
        match err {
            SpawnerError::Template { .. } => CliError::Template {
                message,
                help: Some("run `kubetemplate render` to see the helm output".to_string()),
            },
            SpawnerError::RendererUnavailable { binary, .. } => CliError::Template {
                message,
                help: Some(format!(
                    "install helm or set helmBinary in the config (currently '{}')",
                    binary
                )),
            },
            SpawnerError::InvalidConfig { .. } | SpawnerError::InvalidTemplatePath { .. } => {
                CliError::Config {
                    message,
                    help: None,
                }
            }
            SpawnerError::InvalidServerName { .. } => CliError::Input { message },
            SpawnerError::Kube(_)
            | SpawnerError::MultipleConnectionManifests { .. }
            | SpawnerError::NoConnectionManifest { .. }
            | SpawnerError::UnsupportedConnectionKind { .. }
            | SpawnerError::MissingAddress { .. } => CliError::Cluster { message },
            SpawnerError::Io(_) => CliError::Io { message },
            _ => CliError::Other { message },
        }
    }
}

impl From<kubetemplate_kube::KubeError> for CliError {
    fn from(err: kubetemplate_kube::KubeError) -> Self {
        CliError::Cluster {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Other {
            message: format!("invalid session state: {}", err),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
