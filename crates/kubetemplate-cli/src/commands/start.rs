//! Start command - deploy a session and wait for its server

use console::style;
use tracing::debug;

use crate::commands::Context;
use crate::display;
use crate::error::Result;

/// Run the start command
pub async fn run(ctx: &Context) -> Result<()> {
    let state = ctx.state_file.load()?;
    let mut spawner = ctx.spawner(state).await?;

    display::step(&format!(
        "Starting server {} in namespace {}",
        style(ctx.names.escaped_user_server()).cyan(),
        style(&ctx.config.namespace).yellow()
    ));

    let printer = spawner
        .take_progress()
        .map(|feed| tokio::spawn(display::follow_progress(feed)));

    let result = spawner.start().await;

    if let Some(printer) = printer
        && let Err(e) = printer.await
    {
        debug!(error = %e, "progress printer stopped");
    }

    // rendered manifests are kept even when the deploy failed
    debug!(path = %ctx.state_file.path().display(), "saving session state");
    ctx.state_file.save(&spawner.state())?;

    let (address, port) = result?;
    display::success(&format!(
        "Server ready at {}",
        style(format!("{}:{}", address, port)).cyan()
    ));

    Ok(())
}
