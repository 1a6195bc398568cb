//! Delete command - remove everything kept for a user

use console::style;

use crate::commands::Context;
use crate::display;
use crate::error::Result;

/// Run the delete command
pub async fn run(ctx: &Context) -> Result<()> {
    let state = ctx.state_file.load()?;
    let mut spawner = ctx.spawner(state).await?;

    display::step(&format!(
        "Deleting user data for {}",
        style(&ctx.names.username).cyan()
    ));

    let result = spawner.delete_forever().await;
    ctx.state_file.save(&spawner.state())?;

    display::print_summary(&result?);
    Ok(())
}
