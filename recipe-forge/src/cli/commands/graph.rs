//! Graph command - build order, layers and change impact

use super::{load_config, open_forge};
use crate::cli::app::GraphArgs;
use anyhow::Result;
use std::path::Path;

pub async fn execute(args: GraphArgs, config_path: Option<&Path>) -> Result<bool> {
    let forge = open_forge(load_config(config_path)?).await?;

    if let (true, Some(unit)) = (args.impact, args.unit.as_deref()) {
        let impact = forge.impact(unit)?;
        println!(" Changing {} affects {} recipes", impact.changed, impact.transitive_dependents.len());
        println!("   direct:     {}", join(impact.direct_dependents.iter()));
        println!("   transitive: {}", join(impact.transitive_dependents.iter()));
        println!("\n Rebuild layers:");
        for (i, layer) in impact.rebuild_layers.iter().enumerate() {
            println!("   {}: {}", i, layer.join(", "));
        }
        return Ok(true);
    }

    let plan = forge.plan(args.unit.as_deref())?;
    println!(" Build order ({} recipes):", plan.unit_count());
    for (i, name) in plan.order.iter().enumerate() {
        let deps = forge.registry().get(name).map(|u| join(u.dependencies().iter())).unwrap_or_default();
        println!("   {:>3}. {:<24} <- {}", i + 1, name, deps);
    }

    if args.layers {
        println!("\n Parallel layers:");
        for (i, layer) in plan.layers.iter().enumerate() {
            println!("   {}: {}", i, layer.join(", "));
        }
    }

    Ok(true)
}

fn join<'a>(names: impl Iterator<Item = &'a String>) -> String {
    let names: Vec<&str> = names.map(String::as_str).collect();
    if names.is_empty() { "-".to_string() } else { names.join(", ") }
}
