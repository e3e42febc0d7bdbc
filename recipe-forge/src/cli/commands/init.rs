//! Init command - write a default configuration

use crate::cli::app::InitArgs;
use anyhow::{Context, Result};
use recipe_forge_core::ForgeConfig;
use std::fs;
use std::path::Path;
use tracing::info;

pub fn execute(args: InitArgs, config_path: Option<&Path>) -> Result<bool> {
    let path = config_path.map(Path::to_path_buf).unwrap_or_else(ForgeConfig::default_path);
    if path.exists() && !args.force {
        println!(" Configuration already exists at {} (use --force to overwrite)", path.display());
        return Ok(false);
    }

    let config = ForgeConfig::default();
    config.save(&path).with_context(|| format!("Failed to write {}", path.display()))?;

    for dir in [&config.recipes_dir, &config.cache_dir] {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    info!("Initialized recipe-forge at {}", path.display());
    println!(" Wrote {}", path.display());
    println!(" Recipes go in {}/<name>/recipe.yaml", config.recipes_dir.display());
    println!(" Configure [collaborators.code_generator] and [collaborators.test_generator] before building");
    Ok(true)
}
