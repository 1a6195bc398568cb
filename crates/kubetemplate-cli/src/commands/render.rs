//! Render command - show what a session would deploy

use console::style;
use kubetemplate_spawner::{HelmRenderer, TemplateRenderer, template_values};

use crate::commands::Context;
use crate::error::{CliError, Result};

/// Run the render command
pub async fn run(ctx: &Context, show_values: bool) -> Result<()> {
    let values = template_values(&ctx.config, &ctx.names);

    if show_values {
        let yaml = serde_yaml::to_string(&values).map_err(|e| CliError::Other {
            message: e.to_string(),
        })?;
        print!("{}", yaml);
        return Ok(());
    }

    let renderer = HelmRenderer::new(ctx.config.helm_binary.clone());
    let manifests = renderer.render(&ctx.config.template_path, &values).await?;

    for manifest in &manifests {
        println!("---");
        print!("{}", manifest.to_yaml()?);
    }

    eprintln!(
        "{} Rendered {} manifest(s) for {}",
        style("✓").green().bold(),
        manifests.len(),
        style(ctx.names.escaped_user_server()).cyan()
    );

    Ok(())
}
