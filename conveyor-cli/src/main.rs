//! Conveyor CLI
//!
//! Command-line interface for interacting with the Conveyor orchestrator.
//!
//! Exit codes follow the outcome of the command: `pipeline run` exits 1
//! when the run fails, `pipeline approve|reject` exit 2 when the run is not
//! waiting for approval. Any other error exits 1.

mod commands;
mod config;
mod id_resolver;
mod output;
mod types;

use clap::Parser;
use colored::*;
use commands::{Commands, handle_command};
use config::Config;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(about = "Conveyor release pipeline CLI", long_about = None)]
struct Cli {
    /// Orchestrator URL
    #[arg(
        long,
        env = "CONVEYOR_ORCHESTRATOR_URL",
        default_value = "http://localhost:8080"
    )]
    orchestrator_url: String,

    /// Seconds between state polls while waiting for a run
    #[arg(long, env = "CONVEYOR_POLL_INTERVAL", default_value = "2")]
    poll_interval: u64,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = Config {
        orchestrator_url: cli.orchestrator_url,
        poll_interval: Duration::from_secs(cli.poll_interval.max(1)),
    };

    match handle_command(cli.command, &config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
