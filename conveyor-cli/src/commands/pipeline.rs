//! Pipeline command handlers
//!
//! Handles pipeline definitions (create, list, get, delete) and routes the
//! run-related subcommands to the run handlers.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use conveyor_core::dto::pipeline::CreatePipeline;
use std::process::ExitCode;

use crate::commands::run;
use crate::config::Config;
use crate::id_resolver::resolve_pipeline_id;
use crate::output::{print_pipeline_details, print_pipeline_summary};
use conveyor_client::OrchestratorClient;

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Create a pipeline from a Lua definition file
    Create {
        /// Path to the Lua definition
        file: String,

        /// Only validate the definition, do not send it
        #[arg(long)]
        dry_run: bool,
    },
    /// List all pipelines
    List,
    /// Show a pipeline's stages and actions
    Get {
        /// Pipeline name, ID or unambiguous ID prefix
        pipeline: String,

        /// Print the raw JSON document
        #[arg(long)]
        json: bool,
    },
    /// Delete a pipeline and its run history
    Delete {
        /// Pipeline name, ID or unambiguous ID prefix
        pipeline: String,
    },
    /// Start a run and follow it until it finishes
    Run {
        /// Pipeline name, ID or unambiguous ID prefix
        pipeline: String,

        /// Print the run ID and return without waiting
        #[arg(short, long)]
        detach: bool,
    },
    /// Approve a run waiting at an approval gate
    Approve {
        /// Run ID or unambiguous prefix
        run: String,
    },
    /// Reject a run waiting at an approval gate
    Reject {
        /// Run ID or unambiguous prefix
        run: String,
    },
    /// Show the state of a run
    Status {
        /// Run ID or unambiguous prefix
        run: String,

        /// Print the raw JSON document
        #[arg(long)]
        json: bool,
    },
    /// Cancel a run
    Cancel {
        /// Run ID or unambiguous prefix
        run: String,
    },
    /// Re-run the failed stage of a run
    Retry {
        /// Run ID or unambiguous prefix
        run: String,
    },
    /// List runs, newest first
    Runs {
        /// Only runs of this pipeline (name, ID or prefix)
        pipeline: Option<String>,
    },
    /// Show the job logs of a run
    Logs {
        /// Run ID or unambiguous prefix
        run: String,
    },
}

/// Handle pipeline commands
pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<ExitCode> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        PipelineCommands::Create { file, dry_run } => create_pipeline(&client, &file, dry_run).await,
        PipelineCommands::List => list_pipelines(&client).await,
        PipelineCommands::Get { pipeline, json } => get_pipeline(&client, &pipeline, json).await,
        PipelineCommands::Delete { pipeline } => delete_pipeline(&client, &pipeline).await,
        PipelineCommands::Run { pipeline, detach } => {
            run::run_pipeline(&client, &pipeline, detach, config.poll_interval).await
        }
        PipelineCommands::Approve { run } => run::decide(&client, &run, run::Decision::Approve).await,
        PipelineCommands::Reject { run } => run::decide(&client, &run, run::Decision::Reject).await,
        PipelineCommands::Status { run, json } => run::status(&client, &run, json).await,
        PipelineCommands::Cancel { run } => run::cancel(&client, &run).await,
        PipelineCommands::Retry { run } => run::retry(&client, &run).await,
        PipelineCommands::Runs { pipeline } => run::list_runs(&client, pipeline.as_deref()).await,
        PipelineCommands::Logs { run } => run::logs(&client, &run).await,
    }
}

/// Create a pipeline from a Lua definition
///
/// The definition is validated locally first so errors point at the file
/// before anything is sent.
async fn create_pipeline(client: &OrchestratorClient, path: &str, dry_run: bool) -> Result<ExitCode> {
    let definition = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read definition file: {}", path))?;

    let preview = conveyor_lua::parse_pipeline(&definition)
        .with_context(|| format!("Invalid pipeline definition in {}", path))?;

    if dry_run {
        println!("{}", "✓ Definition is valid".green().bold());
        print_pipeline_details(&preview);
        return Ok(ExitCode::SUCCESS);
    }

    let pipeline = client.create_pipeline(CreatePipeline { definition }).await?;

    println!("{}", "✓ Pipeline created successfully!".green().bold());
    println!("  ID:     {}", pipeline.id.to_string().cyan());
    println!("  Name:   {}", pipeline.name.bold());
    println!(
        "  Stages: {}",
        pipeline
            .stages
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(" → ")
            .dimmed()
    );

    Ok(ExitCode::SUCCESS)
}

/// List all pipelines
async fn list_pipelines(client: &OrchestratorClient) -> Result<ExitCode> {
    let pipelines = client.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{}", "No pipelines found.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} pipeline(s):", pipelines.len()).bold()
        );
        println!();
        for pipeline in &pipelines {
            print_pipeline_summary(pipeline);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Get and display a single pipeline
async fn get_pipeline(client: &OrchestratorClient, reference: &str, json: bool) -> Result<ExitCode> {
    let id = resolve_pipeline_id(client, reference).await?;
    let pipeline = client.get_pipeline(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&pipeline)?);
    } else {
        print_pipeline_details(&pipeline);
    }

    Ok(ExitCode::SUCCESS)
}

/// Delete a pipeline
async fn delete_pipeline(client: &OrchestratorClient, reference: &str) -> Result<ExitCode> {
    let id = resolve_pipeline_id(client, reference).await?;

    client.delete_pipeline(id).await?;

    println!(
        "{}",
        format!("✓ Pipeline {} deleted successfully!", id)
            .green()
            .bold()
    );

    Ok(ExitCode::SUCCESS)
}
