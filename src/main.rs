mod app;
mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use fetchpool::observability;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    observability::init_tracing();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => app::run(args).await,
        Commands::Context(args) => app::run_context(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fetchpool failed");
            ExitCode::FAILURE
        }
    }
}
