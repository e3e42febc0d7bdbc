use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "recipe-forge",
    version,
    about = "Recipe Forge - build software from recipes, test first",
    long_about = "Recipe Forge turns a directory of recipes (requirements, design and metadata) into working code. Recipes are built in dependency order, in parallel where possible, through a test-first pipeline, and only rebuilt when they change."
)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a recipe and everything it depends on
    #[command(about = "Build a recipe (or all recipes) in dependency order")]
    Execute(ExecuteArgs),

    /// Score a recipe's complexity
    #[command(about = "Score a recipe's complexity and propose a decomposition")]
    Analyze(AnalyzeArgs),

    /// Build the orchestrator's own recipe
    #[command(name = "self-host", about = "Regenerate, validate or verify the orchestrator's own recipe")]
    SelfHost(SelfHostArgs),

    /// Run one recipe's pipeline without building its dependencies
    #[command(about = "Run the pipeline for a single recipe and print every stage")]
    Pipeline(PipelineArgs),

    /// Show the dependency graph
    #[command(about = "Show build order, parallel layers or change impact")]
    Graph(GraphArgs),

    /// Show cached build state
    #[command(about = "Show the cached build state of every recipe")]
    Status,

    /// Forget cached build state
    #[command(about = "Forget cached build state for one recipe or all of them")]
    Clean(CleanArgs),

    /// Write a default configuration
    #[command(about = "Initialize recipe-forge configuration and directory structure")]
    Init(InitArgs),
}

#[derive(Args, Debug)]
pub struct ExecuteArgs {
    /// Recipe to build
    #[arg(required_unless_present = "all")]
    pub unit: Option<String>,

    /// Build every recipe in the registry
    #[arg(long, conflicts_with = "unit")]
    pub all: bool,

    /// Only validate and score, generate nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Rebuild even if the cache says the recipe is up to date
    #[arg(long)]
    pub force: bool,

    /// Where generated artifacts go (defaults to the configured output_dir)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Permit writing into the orchestrator's own source tree
    #[arg(long)]
    pub allow_self_overwrite: bool,

    /// Answer yes to confirmation prompts
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Recipe to analyze
    pub unit: String,

    /// Show the decomposition plan even if the recipe is within limits
    #[arg(long)]
    pub decompose: bool,

    /// Write the proposed sub-recipes into the recipes directory
    #[arg(long, requires = "decompose")]
    pub write: bool,
}

#[derive(Args, Debug)]
pub struct SelfHostArgs {
    /// Only validate and score the self-hosting recipe
    #[arg(long, conflicts_with = "verify")]
    pub validate: bool,

    /// Check existing output against the self-hosting manifest
    #[arg(long)]
    pub verify: bool,

    /// Write the output over the orchestrator's own source tree
    #[arg(long)]
    pub overwrite: bool,

    /// Answer yes to confirmation prompts
    #[arg(short, long)]
    pub yes: bool,

    /// Where generated artifacts go (ignored with --overwrite)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PipelineArgs {
    /// Recipe to run
    pub unit: String,

    /// Where generated artifacts go (defaults to the configured output_dir)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Print the full run as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Limit the graph to this recipe and its dependencies
    pub unit: Option<String>,

    /// Show parallel build layers
    #[arg(long)]
    pub layers: bool,

    /// Show what must be rebuilt when the recipe changes
    #[arg(long, requires = "unit")]
    pub impact: bool,
}

#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Recipe to forget; all recipes when omitted
    pub unit: Option<String>,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing configuration file
    #[arg(long)]
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_flags() {
        let cli = Cli::try_parse_from([
            "recipe-forge",
            "-vv",
            "execute",
            "cache",
            "--dry-run",
            "--output-dir",
            "out",
            "--allow-self-overwrite",
            "--yes",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        let Commands::Execute(args) = cli.command else {
            panic!("expected execute");
        };
        assert_eq!(args.unit.as_deref(), Some("cache"));
        assert!(args.dry_run && args.allow_self_overwrite && args.yes && !args.force);
        assert_eq!(args.output_dir, Some(PathBuf::from("out")));
    }

    #[test]
    fn test_execute_needs_unit_or_all() {
        assert!(Cli::try_parse_from(["recipe-forge", "execute"]).is_err());
        assert!(Cli::try_parse_from(["recipe-forge", "execute", "--all"]).is_ok());
        assert!(Cli::try_parse_from(["recipe-forge", "execute", "cache", "--all"]).is_err());
    }

    #[test]
    fn test_self_host_modes_conflict() {
        assert!(Cli::try_parse_from(["recipe-forge", "self-host", "--validate", "--verify"]).is_err());
        let cli = Cli::try_parse_from(["recipe-forge", "--config", "forge.toml", "self-host", "--overwrite"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("forge.toml")));
        assert!(matches!(cli.command, Commands::SelfHost(SelfHostArgs { overwrite: true, .. })));
    }

    #[test]
    fn test_graph_impact_requires_unit() {
        assert!(Cli::try_parse_from(["recipe-forge", "graph", "--impact"]).is_err());
        assert!(Cli::try_parse_from(["recipe-forge", "graph", "cache", "--impact"]).is_ok());
    }
}
