//! Terminal output helpers shared by the command handlers

use colored::*;
use conveyor_core::domain::log::{LogEntry, LogLevel};
use conveyor_core::domain::pipeline::{Action, ActionKind, Pipeline};
use conveyor_core::domain::run::{PipelineRun, RunState, StageStatus};
use conveyor_core::dto::log::RunLogEntry;
use conveyor_core::dto::pipeline::PipelineSummary;
use conveyor_core::dto::run::RunSummary;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Colorize a run state for display
pub fn colorize_state(state: &RunState) -> ColoredString {
    let text = state.to_string();
    match state {
        RunState::NotStarted => text.dimmed(),
        RunState::Running { .. } => text.blue(),
        RunState::AwaitingApproval { .. } => text.yellow(),
        RunState::Succeeded => text.green(),
        RunState::Failed { .. } => text.red(),
    }
}

fn colorize_stage_status(status: StageStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        StageStatus::Pending => text.dimmed(),
        StageStatus::Running => text.blue(),
        StageStatus::AwaitingApproval => text.yellow(),
        StageStatus::Succeeded => text.green(),
        StageStatus::Failed => text.red(),
    }
}

/// One-line description of what an action does
pub fn describe_action(action: &Action) -> String {
    let mut text = match &action.kind {
        ActionKind::SourceCheckout(spec) => {
            format!("checkout {}@{}", spec.repository, spec.branch)
        }
        ActionKind::BuildCommand(spec) | ActionKind::DeployCommand(spec) => {
            let mut text = format!(
                "{} in {} ({} command(s))",
                action.kind,
                spec.image,
                spec.commands.len()
            );
            if spec.privileged {
                text.push_str(", privileged");
            }
            if let Some(target) = &spec.target {
                text.push_str(&format!(", target {}", target));
            }
            text
        }
        ActionKind::ManualApproval(spec) => match &spec.message {
            Some(message) => format!("approval: {}", message),
            None => "approval".to_string(),
        },
    };

    if !action.inputs.is_empty() {
        text.push_str(&format!(" <- {}", action.inputs.join(", ")));
    }
    if let Some(output) = &action.output {
        text.push_str(&format!(" -> {}", output));
    }
    text
}

/// Print a pipeline summary
pub fn print_pipeline_summary(pipeline: &PipelineSummary) {
    println!("  {} {}", "▸".cyan(), pipeline.name.bold());
    println!("    ID:      {}", pipeline.id.to_string().dimmed());
    println!("    Stages:  {}", pipeline.stages.join(" → ").dimmed());
    println!(
        "    Created: {}",
        pipeline.created_at.format(TIME_FORMAT).to_string().dimmed()
    );
    if let Some(desc) = &pipeline.description {
        println!("    Description: {}", desc.dimmed());
    }
    println!();
}

/// Print detailed pipeline information
pub fn print_pipeline_details(pipeline: &Pipeline) {
    println!("{}", "Pipeline Details:".bold());
    println!("  ID:          {}", pipeline.id.to_string().cyan());
    println!("  Name:        {}", pipeline.name.bold());
    if let Some(desc) = &pipeline.description {
        println!("  Description: {}", desc);
    }
    println!("  Created:     {}", pipeline.created_at.format(TIME_FORMAT));
    if let Some(timeout) = pipeline.config.approval_timeout_seconds {
        println!("  Approval timeout: {}s", timeout);
    }
    if !pipeline.config.env_vars.is_empty() {
        let mut keys: Vec<_> = pipeline.config.env_vars.keys().map(String::as_str).collect();
        keys.sort_unstable();
        println!("  Env:         {}", keys.join(", "));
    }

    println!("\n{}", "Stages:".bold());
    for (index, stage) in pipeline.stages.iter().enumerate() {
        println!("  {}. {}", index, stage.name.bold());
        for action in &stage.actions {
            println!("     - {}: {}", action.name.cyan(), describe_action(action).dimmed());
        }
    }
}

/// Print a run summary
pub fn print_run_summary(run: &RunSummary) {
    println!(
        "  {} Run {} of {}",
        "▸".cyan(),
        run.id.to_string().dimmed(),
        run.pipeline_name.bold()
    );
    print!("    State:     {}", colorize_state(&run.state));
    if let Some(stage) = &run.stage_name {
        print!(" ({})", stage);
    }
    println!();
    println!(
        "    Requested: {}",
        run.requested_at.format(TIME_FORMAT).to_string().dimmed()
    );
    if let Some(completed) = run.completed_at {
        println!(
            "    Completed: {}",
            completed.format(TIME_FORMAT).to_string().dimmed()
        );
    }
    println!();
}

/// Print detailed run information
pub fn print_run_details(run: &PipelineRun) {
    println!("{}", "Run Details:".bold());
    println!("  ID:        {}", run.id.to_string().cyan());
    println!("  Pipeline:  {}", run.pipeline_name.bold());
    println!("  State:     {}", colorize_state(&run.state));
    println!("  Requested: {}", run.requested_at.format(TIME_FORMAT));
    if let Some(completed) = run.completed_at {
        println!("  Completed: {}", completed.format(TIME_FORMAT));
    }

    if let Some((stage, cause)) = run.failure() {
        println!("  {} stage '{}' failed: {}", "✗".red(), stage, cause);
    }

    println!("\n{}", "Stages:".bold());
    for (index, stage) in run.stages.iter().enumerate() {
        print!(
            "  {}. {:<24} {}",
            index,
            stage.name,
            colorize_stage_status(stage.status)
        );
        if stage.attempts > 1 {
            print!(" (attempt {})", stage.attempts);
        }
        println!();
        if let Some(error) = &stage.error {
            println!("     {}", error.red());
        }
    }
}

fn colorize_level(level: LogLevel) -> ColoredString {
    let text = format!("{:<7}", level.to_string());
    match level {
        LogLevel::Debug => text.dimmed(),
        LogLevel::Info => text.normal(),
        LogLevel::Warning => text.yellow(),
        LogLevel::Error => text.red(),
    }
}

/// Print a single log entry
pub fn print_log_entry(entry: &LogEntry) {
    println!(
        "{} {} {}",
        entry.timestamp.format(TIME_FORMAT).to_string().dimmed(),
        colorize_level(entry.level),
        entry.message
    );
}

/// Print the logs of a run, with a header whenever the job changes
pub fn print_run_logs(logs: &[RunLogEntry]) {
    let mut current = None;

    for log in logs {
        if current != Some(log.job_id) {
            current = Some(log.job_id);
            println!(
                "{} {} / {} {}",
                "──".dimmed(),
                log.stage.bold(),
                log.action.cyan(),
                format!("(job {})", log.job_id).dimmed()
            );
        }
        print_log_entry(&log.entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::domain::pipeline::{ApprovalSpec, CommandSpec};

    #[test]
    fn test_describe_source_action() {
        let action = Action::source("checkout", "codeartifact-repo", "main").output("source_output");
        assert_eq!(
            describe_action(&action),
            "checkout codeartifact-repo@main -> source_output"
        );
    }

    #[test]
    fn test_describe_command_action() {
        let spec = CommandSpec::new("amazonlinux:2", ["sam build", "sam deploy"])
            .privileged(true)
            .target("lambda:codeartifact-test-function");
        let action = Action::deploy("Deploy_Lambda", spec).input("build_output");

        assert_eq!(
            describe_action(&action),
            "deploy in amazonlinux:2 (2 command(s)), privileged, target lambda:codeartifact-test-function <- build_output"
        );
    }

    #[test]
    fn test_describe_approval_action() {
        let spec = ApprovalSpec {
            message: Some("Ship it?".to_string()),
            ..ApprovalSpec::default()
        };
        assert_eq!(describe_action(&Action::approval("Approve", spec)), "approval: Ship it?");
    }
}
