//! Self-host command - build the orchestrator's own recipe

use super::{cancel_on_interrupt, confirmation, load_config, open_forge, print_report};
use crate::cli::app::SelfHostArgs;
use anyhow::{Context, Result, bail};
use recipe_forge_core::BuildOptions;
use std::path::Path;
use tracing::info;

pub async fn execute(args: SelfHostArgs, config_path: Option<&Path>, verbose: u8) -> Result<bool> {
    let config = load_config(config_path)?;
    let recipe = config.self_recipe.clone();
    let mut forge = open_forge(config).await?;

    if !forge.registry().contains(&recipe) {
        bail!(
            "Self-hosting recipe '{}' not found in {}",
            recipe,
            forge.config().recipes_dir.display()
        );
    }

    let output_dir = if args.overwrite {
        forge = forge.allow_self_overwrite(confirmation(args.yes))?;
        forge.config().source_root.clone()
    } else {
        args.output_dir.clone().unwrap_or_else(|| forge.config().output_dir.clone())
    };

    if args.verify {
        let missing = forge
            .verify_self_hosting(&output_dir)
            .with_context(|| format!("Failed to read self-hosting output in {}", output_dir.display()))?;
        if missing.is_empty() {
            println!(" Self-hosting output in {} is complete", output_dir.join(&recipe).display());
        } else {
            println!(" Self-hosting output in {} is missing:", output_dir.join(&recipe).display());
            for name in &missing {
                println!("   - {}", name);
            }
        }
        return Ok(missing.is_empty());
    }

    if !args.validate && !forge.has_collaborators() {
        bail!("No code or test generator configured; self-hosting needs both");
    }

    info!("Self-hosting {} into {}", recipe, output_dir.display());
    cancel_on_interrupt(&forge);

    let options = BuildOptions {
        target: Some(recipe.clone()),
        force: false,
        dry_run: args.validate,
        output_dir: Some(output_dir),
    };
    let report = forge.build(options).await.with_context(|| format!("Failed to self-host {}", recipe))?;

    print_report(&report, verbose);
    Ok(report.success())
}
