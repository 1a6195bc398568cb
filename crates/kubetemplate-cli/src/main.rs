//! KubeTemplate CLI - per-user servers from a Helm chart

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;
mod error;
mod exit_codes;
mod state;

use commands::{Context, SessionArgs};
use error::Result;

#[derive(Parser)]
#[command(name = "kubetemplate")]
#[command(author = "KubeTemplate Contributors")]
#[command(version)]
#[command(about = "Render, deploy and tear down per-user servers from a Helm chart", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Config file (default: ~/.config/kubetemplate/config.yaml)
    #[arg(long, global = true, env = "KUBETEMPLATE_CONFIG")]
    config: Option<PathBuf>,

    /// Session state file (default: one file per user server under the data directory)
    #[arg(long, global = true)]
    state: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the chart for a session without touching the cluster
    Render {
        #[command(flatten)]
        session: SessionArgs,

        /// Print the template values instead of the manifests
        #[arg(long)]
        show_values: bool,
    },

    /// Deploy a session and wait until its server is reachable
    Start {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Delete objects annotated for deletion when the server stops
    Stop {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Delete objects annotated for deletion when the user is removed
    Delete {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Check whether the session's server still exists
    Poll {
        #[command(flatten)]
        session: SessionArgs,
    },
}

fn init_tracing(debug: bool) {
    let default = if debug {
        "debug"
    } else {
        "warn,kubetemplate_kube=info,kubetemplate_spawner=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<i32> {
    let config = cli.config.as_deref();
    let state = cli.state.as_deref();

    match cli.command {
        Commands::Render {
            session,
            show_values,
        } => {
            let ctx = Context::load(config, state, &session)?;
            commands::render::run(&ctx, show_values).await?;
        }
        Commands::Start { session } => {
            let ctx = Context::load(config, state, &session)?;
            commands::start::run(&ctx).await?;
        }
        Commands::Stop { session } => {
            let ctx = Context::load(config, state, &session)?;
            commands::stop::run(&ctx).await?;
        }
        Commands::Delete { session } => {
            let ctx = Context::load(config, state, &session)?;
            commands::delete::run(&ctx).await?;
        }
        Commands::Poll { session } => {
            let ctx = Context::load(config, state, &session)?;
            return commands::poll::run(&ctx).await;
        }
    }

    Ok(exit_codes::SUCCESS)
}

#[tokio::main]
async fn main() {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            code
        }
    };

    std::process::exit(code);
}
