//! Run command handlers
//!
//! Starting and following runs, approval decisions and run inspection.

use anyhow::Result;
use colored::*;
use conveyor_core::domain::run::{PipelineRun, RunState};
use std::process::ExitCode;
use std::time::Duration;

use crate::id_resolver::{resolve_pipeline_id, resolve_run_id};
use crate::output::{colorize_state, print_run_details, print_run_logs, print_run_summary};
use conveyor_client::{ClientError, OrchestratorClient};

/// Exit code of an approval decision the run's state does not allow
const INVALID_TRANSITION_EXIT_CODE: u8 = 2;

/// Approval decision sent for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

/// Exit status reported for a finished run
fn exit_status(state: &RunState) -> u8 {
    match state {
        RunState::Failed { .. } => 1,
        _ => 0,
    }
}

/// Start a run and, unless detached, follow it to a terminal state
pub async fn run_pipeline(
    client: &OrchestratorClient,
    reference: &str,
    detach: bool,
    poll_interval: Duration,
) -> Result<ExitCode> {
    let pipeline_id = resolve_pipeline_id(client, reference).await?;
    let run = client.run_pipeline(pipeline_id).await?;

    println!(
        "{} Run {} of {} started",
        "▸".cyan(),
        run.id.to_string().cyan(),
        run.pipeline_name.bold()
    );

    if detach {
        println!(
            "  Follow it with: {}",
            format!("conveyor pipeline status {}", run.id).dimmed()
        );
        return Ok(ExitCode::SUCCESS);
    }

    let run = follow_run(client, run, poll_interval).await?;
    report_outcome(&run);

    Ok(ExitCode::from(exit_status(&run.state)))
}

/// Polls a run until it is terminal, printing each state change
async fn follow_run(
    client: &OrchestratorClient,
    mut run: PipelineRun,
    poll_interval: Duration,
) -> Result<PipelineRun> {
    let mut last_state = None;

    loop {
        if last_state.as_ref() != Some(&run.state) {
            print_state_change(&run);
            last_state = Some(run.state.clone());
        }

        if run.state.is_terminal() {
            return Ok(run);
        }

        tokio::time::sleep(poll_interval).await;
        run = client.get_run(run.id).await?;
    }
}

fn print_state_change(run: &PipelineRun) {
    match (&run.state, run.current_stage_name()) {
        (RunState::AwaitingApproval { .. }, Some(stage)) => {
            println!(
                "  {} {} waiting for approval",
                colorize_state(&run.state),
                stage.bold()
            );
            println!(
                "    {}",
                format!(
                    "conveyor pipeline approve {id}  |  conveyor pipeline reject {id}",
                    id = run.id
                )
                .dimmed()
            );
        }
        (RunState::Running { .. }, Some(stage)) => {
            println!("  {} {}", colorize_state(&run.state), stage.bold());
        }
        _ => println!("  {}", colorize_state(&run.state)),
    }
}

fn report_outcome(run: &PipelineRun) {
    match run.failure() {
        Some((stage, cause)) => println!(
            "{} Run failed at stage '{}': {}",
            "✗".red().bold(),
            stage,
            cause
        ),
        None => println!("{}", "✓ Run succeeded".green().bold()),
    }
}

/// Approve or reject a run waiting at an approval gate
///
/// Exits with 2 when the orchestrator refuses the decision because the run
/// is not awaiting approval.
pub async fn decide(client: &OrchestratorClient, reference: &str, decision: Decision) -> Result<ExitCode> {
    let run_id = resolve_run_id(client, reference).await?;

    let result = match decision {
        Decision::Approve => client.approve_run(run_id).await,
        Decision::Reject => client.reject_run(run_id).await,
    };

    match result {
        Ok(run) => {
            let verb = match decision {
                Decision::Approve => "approved",
                Decision::Reject => "rejected",
            };
            println!("{}", format!("✓ Run {} {}", run.id, verb).green().bold());
            println!("  State: {}", colorize_state(&run.state));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let Some(code) = refused_decision_status(&e) else {
                return Err(e.into());
            };
            eprintln!(
                "{} {}",
                "Cannot change approval:".yellow().bold(),
                e.api_message().unwrap_or("run is not awaiting approval")
            );
            Ok(ExitCode::from(code))
        }
    }
}

/// Exit status for a decision the orchestrator refused because of the
/// run's state; `None` for every other error
fn refused_decision_status(err: &ClientError) -> Option<u8> {
    err.is_conflict().then_some(INVALID_TRANSITION_EXIT_CODE)
}

/// Show the state of a run
///
/// Always exits 0. When the run cannot be fetched its state is reported as
/// `unknown`, or `unreachable` when the orchestrator did not answer.
pub async fn status(client: &OrchestratorClient, reference: &str, json: bool) -> Result<ExitCode> {
    let run = match resolve_run_id(client, reference).await {
        Ok(run_id) => client.get_run(run_id).await.map_err(anyhow::Error::from),
        Err(e) => Err(e),
    };

    Ok(ExitCode::from(report_status(run, json)))
}

fn report_status(run: Result<PipelineRun>, json: bool) -> u8 {
    match run {
        Ok(run) if json => match serde_json::to_string_pretty(&run) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("{} {}", "Error:".red().bold(), e),
        },
        Ok(run) => print_run_details(&run),
        Err(e) => {
            eprintln!("State: {}", unavailable_state(&e).yellow());
            eprintln!("{} {:#}", "Error:".red().bold(), e);
        }
    }

    0
}

/// State shown for a run whose status could not be fetched
fn unavailable_state(err: &anyhow::Error) -> &'static str {
    match err.downcast_ref::<ClientError>() {
        Some(ClientError::RequestFailed(_)) => "unreachable",
        _ => "unknown",
    }
}

/// Cancel a run
pub async fn cancel(client: &OrchestratorClient, reference: &str) -> Result<ExitCode> {
    let run_id = resolve_run_id(client, reference).await?;
    let run = client.cancel_run(run_id).await?;

    println!("{}", format!("✓ Run {} cancelled", run.id).green().bold());
    println!("  State: {}", colorize_state(&run.state));

    Ok(ExitCode::SUCCESS)
}

/// Re-run the failed stage of a run
pub async fn retry(client: &OrchestratorClient, reference: &str) -> Result<ExitCode> {
    let run_id = resolve_run_id(client, reference).await?;
    let run = client.retry_run(run_id).await?;

    println!(
        "{}",
        format!("✓ Run {} resumed", run.id).green().bold()
    );
    println!("  State: {}", colorize_state(&run.state));

    Ok(ExitCode::SUCCESS)
}

/// List runs, optionally only those of one pipeline
pub async fn list_runs(client: &OrchestratorClient, pipeline: Option<&str>) -> Result<ExitCode> {
    let pipeline_id = match pipeline {
        Some(reference) => Some(resolve_pipeline_id(client, reference).await?),
        None => None,
    };

    let runs = client.list_runs(pipeline_id).await?;

    if runs.is_empty() {
        println!("{}", "No runs found.".yellow());
    } else {
        println!("{}", format!("Found {} run(s):", runs.len()).bold());
        println!();
        for run in &runs {
            print_run_summary(run);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Show the job logs of a run
pub async fn logs(client: &OrchestratorClient, reference: &str) -> Result<ExitCode> {
    let run_id = resolve_run_id(client, reference).await?;
    let logs = client.get_run_logs(run_id).await?;

    if logs.is_empty() {
        println!("{}", "No logs found for this run.".yellow());
    } else {
        print_run_logs(&logs);
    }

    Ok(ExitCode::SUCCESS)
}
