//! Execute command - build recipes in dependency order

use super::{cancel_on_interrupt, confirmation, load_config, open_forge, print_report};
use crate::cli::app::ExecuteArgs;
use anyhow::{Context, Result, bail};
use recipe_forge_core::{BuildOptions, ForgeConfig};
use std::path::Path;

pub async fn execute(args: ExecuteArgs, config_path: Option<&Path>, verbose: u8) -> Result<bool> {
    let config = load_config(config_path)?;
    let mut forge = open_forge(config).await?;
    if args.allow_self_overwrite {
        forge = forge.allow_self_overwrite(confirmation(args.yes))?;
    }

    if !args.dry_run && !forge.has_collaborators() {
        bail!(
            "No code or test generator configured; set [collaborators.code_generator] and [collaborators.test_generator] in {}",
            config_path.map(Path::to_path_buf).unwrap_or_else(ForgeConfig::default_path).display()
        );
    }

    cancel_on_interrupt(&forge);

    let options = BuildOptions {
        target: if args.all { None } else { args.unit },
        force: args.force,
        dry_run: args.dry_run,
        output_dir: args.output_dir,
    };
    let target = options.target.clone().unwrap_or_else(|| "all recipes".to_string());
    let report = forge.build(options).await.with_context(|| format!("Failed to build {}", target))?;

    print_report(&report, verbose);
    Ok(report.success())
}
