//! Poll command - report whether a server is still there

use console::style;

use crate::commands::Context;
use crate::display;
use crate::error::Result;
use crate::exit_codes;

/// Run the poll command, returning the process exit code
pub async fn run(ctx: &Context) -> Result<i32> {
    let state = ctx.state_file.load()?;
    let name = ctx.names.escaped_user_server();

    if state.is_empty() {
        display::warning(&format!("No session for {}", style(&name).cyan()));
        return Ok(exit_codes::NOT_RUNNING);
    }

    let mut spawner = ctx.spawner(state).await?;
    match spawner.poll().await? {
        None => {
            display::success(&format!("Server {} is running", style(&name).cyan()));
            Ok(exit_codes::SUCCESS)
        }
        Some(status) => {
            display::warning(&format!(
                "Server {} is not running (exit status {})",
                style(&name).cyan(),
                status
            ));
            Ok(exit_codes::NOT_RUNNING)
        }
    }
}
