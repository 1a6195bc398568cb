//! Stop command - remove a server, keeping user data

use console::style;

use crate::commands::Context;
use crate::display;
use crate::error::Result;

/// Run the stop command
pub async fn run(ctx: &Context) -> Result<()> {
    let state = ctx.state_file.load()?;
    let mut spawner = ctx.spawner(state).await?;

    display::step(&format!(
        "Stopping server {}",
        style(ctx.names.escaped_user_server()).cyan()
    ));

    let result = spawner.stop().await;
    ctx.state_file.save(&spawner.state())?;

    display::print_summary(&result?);
    Ok(())
}
