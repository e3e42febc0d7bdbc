use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};

mod cli;
mod logging;
use cli::{Cli, Commands};

fn main() -> ExitCode {
    // Parse CLI arguments first to get verbosity level
    let cli = Cli::parse();
    let _log = logging::init(cli.verbose);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let runtime = tokio::runtime::Runtime::new()?;
    let config = cli.config.as_deref();
    let verbose = cli.verbose;

    match cli.command {
        Commands::Execute(args) => {
            info!("Execute command: {:?}", args);
            runtime.block_on(cli::commands::execute::execute(args, config, verbose))
        }
        Commands::Analyze(args) => {
            info!("Analyze command: {:?}", args);
            runtime.block_on(cli::commands::analyze::execute(args, config))
        }
        Commands::SelfHost(args) => {
            info!("Self-host command: {:?}", args);
            runtime.block_on(cli::commands::self_host::execute(args, config, verbose))
        }
        Commands::Pipeline(args) => {
            info!("Pipeline command: {:?}", args);
            runtime.block_on(cli::commands::pipeline::execute(args, config, verbose))
        }
        Commands::Graph(args) => runtime.block_on(cli::commands::graph::execute(args, config)),
        Commands::Status => runtime.block_on(cli::commands::status::status(config)),
        Commands::Clean(args) => runtime.block_on(cli::commands::status::clean(args, config)),
        Commands::Init(args) => cli::commands::init::execute(args, config),
    }
}
