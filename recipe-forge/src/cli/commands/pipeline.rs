//! Pipeline command - one recipe, every stage

use super::{load_config, open_forge, print_run};
use crate::cli::app::PipelineArgs;
use anyhow::{Context, Result, bail};
use std::path::Path;

pub async fn execute(args: PipelineArgs, config_path: Option<&Path>, verbose: u8) -> Result<bool> {
    let forge = open_forge(load_config(config_path)?).await?;
    if !forge.has_collaborators() {
        bail!("No code or test generator configured");
    }

    let run = forge
        .run_pipeline(&args.unit, args.output_dir)
        .await
        .with_context(|| format!("Pipeline for {} could not start", args.unit))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_run(&run, verbose);
    }
    Ok(run.success)
}
