//! Command implementations

pub mod analyze;
pub mod execute;
pub mod graph;
pub mod init;
pub mod pipeline;
pub mod self_host;
pub mod status;

use anyhow::{Context, Result};
use recipe_forge_core::builder::BuildReport;
use recipe_forge_core::executor::UnitStatus;
use recipe_forge_core::guard::{AutoConfirm, Confirmation};
use recipe_forge_core::pipeline::PipelineRun;
use recipe_forge_core::{Forge, ForgeConfig};
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Asks on the terminal
pub struct StdinConfirm;

impl Confirmation for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        eprint!("{} [y/N] ", prompt);
        let _ = std::io::stderr().flush();

        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

pub fn confirmation(yes: bool) -> Arc<dyn Confirmation> {
    if yes { Arc::new(AutoConfirm) } else { Arc::new(StdinConfirm) }
}

pub fn load_config(path: Option<&Path>) -> Result<ForgeConfig> {
    ForgeConfig::load(path).context("Failed to load configuration")
}

pub async fn open_forge(config: ForgeConfig) -> Result<Forge> {
    let recipes = config.recipes_dir.clone();
    Forge::open(config)
        .await
        .with_context(|| format!("Failed to open recipes in {}", recipes.display()))
}

/// Cancel the build on Ctrl-C; outcomes already recorded stay recorded
pub fn cancel_on_interrupt(forge: &Forge) {
    let cancel = forge.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling the build");
            cancel.cancel();
        }
    });
}

/// Stage table for one run; `verbose` adds stage data and warnings
pub fn print_run(run: &PipelineRun, verbose: u8) {
    let mark = if run.success { "ok" } else { "FAILED" };
    println!("\n {} [{}] in {:.1?}", run.unit, mark, run.duration());

    for stage in &run.stages {
        let status = if stage.success { "pass" } else { "fail" };
        println!("   {:<28} {:<5} {:>8.1?}", stage.stage.to_string(), status, stage.duration);
        for error in &stage.errors {
            println!("      error: {}", error);
        }
        if verbose > 0 {
            for warning in &stage.warnings {
                println!("      warning: {}", warning);
            }
            for (key, value) in &stage.data {
                println!("      {}: {}", key, value);
            }
        }
    }

    if !run.fix_attempts.is_empty() {
        let stalled = run.fix_attempts.iter().filter(|a| a.no_progress).count();
        println!("   fix iterations: {} ({} without changes)", run.fix_attempts.len(), stalled);
    }
    if let Some(dir) = &run.output_dir {
        println!("   output: {}", dir.display());
    }
}

pub fn print_report(report: &BuildReport, verbose: u8) {
    println!("\n Build plan ({} units, {} layers):", report.plan.unit_count(), report.plan.layers.len());
    for (name, reason) in &report.reasons {
        println!("   {:<24} {}", name, reason);
    }

    for result in &report.execution.results {
        match &result.status {
            UnitStatus::Succeeded(run) => print_run(run, verbose),
            UnitStatus::Failed { output: Some(run), .. } => print_run(run, verbose),
            UnitStatus::Failed { output: None, error } => {
                println!("\n {} [FAILED]: {}", result.name, error.as_deref().unwrap_or("unknown error"));
            }
            UnitStatus::Skipped { reason } => println!("\n {} [skipped]: {}", result.name, reason),
        }
    }

    let execution = &report.execution;
    println!(
        "\n Summary: {} succeeded, {} failed, {} skipped, {} up to date in {:.1?}{}",
        execution.succeeded().count(),
        execution.failed().count(),
        execution.skipped().count(),
        report.up_to_date().count(),
        execution.duration,
        if execution.cancelled { " (cancelled)" } else { "" }
    );
}
