//! Analyze command - complexity score and decomposition proposal

use super::{load_config, open_forge};
use crate::cli::app::AnalyzeArgs;
use anyhow::{Context, Result};
use recipe_forge_core::complexity::DecompositionPlan;
use std::path::Path;

pub async fn execute(args: AnalyzeArgs, config_path: Option<&Path>) -> Result<bool> {
    let forge = open_forge(load_config(config_path)?).await?;
    let (metrics, plan) = forge.analyze(&args.unit, args.decompose)?;

    println!(" Complexity of {}: {:.1}/100", args.unit, metrics.score);
    println!(
        "   Requirements:  {} functional, {} non-functional",
        metrics.functional_requirements, metrics.non_functional_requirements
    );
    println!("   Components:    {} ({} methods)", metrics.components, metrics.methods);
    println!("   Dependencies:  {}", metrics.dependencies);
    println!("   Interfaces:    {}", metrics.interfaces);
    println!("   Cyclomatic:    {}", metrics.cyclomatic);
    println!("   Cognitive:     {}", metrics.cognitive);
    println!("   Est. lines:    {}", metrics.estimated_lines);

    if metrics.should_decompose {
        let strategy = metrics.strategy.map(|s| s.to_string()).unwrap_or_default();
        println!("\n Recipe should be decomposed ({}):", strategy);
        for reason in &metrics.reasons {
            println!("   - {}", reason);
        }
    }
    for suggestion in &metrics.suggestions {
        println!("   suggestion: {}", suggestion);
    }

    if let Some(plan) = plan {
        print_plan(&plan);
        if args.write {
            let written = forge
                .write_decomposition(&plan)
                .with_context(|| format!("Failed to write sub-recipes of {}", args.unit))?;
            for dir in written {
                println!("   wrote {}", dir.display());
            }
        }
    }

    Ok(true)
}

fn print_plan(plan: &DecompositionPlan) {
    println!("\n Decomposition of {} ({}):", plan.parent, plan.strategy);
    for sub in &plan.sub_units {
        let deps: Vec<&str> = sub.unit.dependencies().iter().map(String::as_str).collect();
        println!(
            "   {:<28} score {:>5.1}  {} requirements  deps [{}]",
            sub.unit.name(),
            sub.metrics.score,
            sub.unit.requirements.requirements.len(),
            deps.join(", ")
        );
    }
}
