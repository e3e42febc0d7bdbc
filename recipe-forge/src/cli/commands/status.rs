//! Status and clean commands - inspect and reset the build cache

use super::{load_config, open_forge};
use crate::cli::app::CleanArgs;
use anyhow::{Context, Result};
use std::path::Path;

pub async fn status(config_path: Option<&Path>) -> Result<bool> {
    let forge = open_forge(load_config(config_path)?).await?;
    let rows = forge.status().await;

    println!(" {:<24} {:<8} {:<20} {}", "RECIPE", "RESULT", "LAST BUILD", "STATE");
    for (name, state, reason) in &rows {
        let (result, built) = match state {
            Some(state) => (
                if state.last_outcome.success { "ok" } else { "failed" },
                state.last_build_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            ),
            None => ("-", "never".to_string()),
        };
        println!(" {:<24} {:<8} {:<20} {}", name, result, built, reason);
    }

    for (name, reason) in forge.registry().load_errors() {
        println!(" {:<24} {:<8} {:<20} {}", name, "broken", "-", reason);
    }

    Ok(true)
}

pub async fn clean(args: CleanArgs, config_path: Option<&Path>) -> Result<bool> {
    let forge = open_forge(load_config(config_path)?).await?;
    let removed = forge.clean(args.unit.as_deref()).await.context("Failed to clean the build cache")?;

    match args.unit {
        Some(unit) => println!(" Removed {} cached record(s) for {}", removed, unit),
        None => println!(" Removed {} cached record(s)", removed),
    }
    Ok(true)
}
