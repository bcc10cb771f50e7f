//! Runner command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use conveyor_core::domain::runner::RunnerStatus;
use conveyor_core::dto::runner::RunnerSummary;
use std::process::ExitCode;

use crate::config::Config;
use conveyor_client::OrchestratorClient;

/// Runner subcommands
#[derive(Subcommand)]
pub enum RunnerCommands {
    /// List all registered runners
    List,
}

/// Handle runner commands
pub async fn handle_runner_command(command: RunnerCommands, config: &Config) -> Result<ExitCode> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        RunnerCommands::List => list_runners(&client).await,
    }
}

/// List all registered runners
async fn list_runners(client: &OrchestratorClient) -> Result<ExitCode> {
    let runners = client.list_runners().await?;

    if runners.is_empty() {
        println!("{}", "No runners registered.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} registered runner(s):", runners.len()).bold()
        );
        println!();
        for runner in &runners {
            print_runner_summary(runner);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_runner_summary(runner: &RunnerSummary) {
    println!("  {} Runner {}", "▸".cyan(), runner.id.bold());
    println!("    Status:       {}", colorize_status(runner.status));
    println!(
        "    Capabilities: {}",
        if runner.capabilities.is_empty() {
            "-".to_string()
        } else {
            runner.capabilities.join(", ")
        }
    );
    println!(
        "    Registered:   {}",
        runner
            .registered_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!(
        "    Last Seen:    {}",
        runner
            .last_heartbeat_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn colorize_status(status: RunnerStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        RunnerStatus::Online => text.green(),
        RunnerStatus::Offline => text.red(),
    }
}
