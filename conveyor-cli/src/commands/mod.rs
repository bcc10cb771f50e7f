//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod pipeline;
mod run;
mod runner;

pub use pipeline::PipelineCommands;
pub use runner::RunnerCommands;

use anyhow::Result;
use clap::Subcommand;
use std::process::ExitCode;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Pipeline definitions and their runs
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Runner management
    Runner {
        #[command(subcommand)]
        command: RunnerCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module and returns the
/// process exit code.
pub async fn handle_command(command: Commands, config: &Config) -> Result<ExitCode> {
    match command {
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, config).await,
        Commands::Runner { command } => runner::handle_runner_command(command, config).await,
    }
}
