//! Pipeline definition parser
//!
//! Evaluates a Lua definition in the sandbox and feeds the resulting table
//! into [`PipelineBuilder`], so every definition error (dangling input,
//! duplicate stage, misplaced approval...) is reported at parse time.

use anyhow::{Context, Result, anyhow, bail};
use mlua::{Table, Value};
use std::collections::HashMap;

use conveyor_core::PipelineBuilder;
use conveyor_core::domain::pipeline::{
    Action, ApprovalSpec, CommandSpec, Pipeline, PipelineConfig,
};

use crate::sandbox::create_sandbox;

/// Parse a pipeline definition from Lua source code
///
/// # Arguments
/// * `source` - Lua source returning the definition table
///
/// # Errors
/// Returns an error if:
/// - The Lua source is invalid or does not return a table
/// - Required fields are missing or have the wrong type
/// - The stages do not form a valid pipeline
///
/// # Example
/// ```
/// use conveyor_lua::parse_pipeline;
///
/// let source = r#"
///     return pipeline.define {
///         name = "release",
///         stages = {
///             pipeline.stage { name = "Source", action = pipeline.source {
///                 name = "checkout", repository = "app", branch = "main", output = "src" } },
///             pipeline.stage { name = "Build", action = pipeline.build {
///                 name = "compile", image = "rust:1", commands = { "cargo build" },
///                 input = "src", output = "bin", artifacts = { "target/release/*" } } },
///         },
///     }
/// "#;
///
/// let pipeline = parse_pipeline(source)?;
/// assert_eq!(pipeline.stages.len(), 2);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn parse_pipeline(source: &str) -> Result<Pipeline> {
    let lua = create_sandbox().context("Failed to create sandbox")?;

    let definition: Table = lua
        .load(source)
        .eval()
        .context("Failed to evaluate pipeline definition")?;

    let name: String = definition
        .get("name")
        .context("Pipeline must have a 'name' field")?;

    let description: Option<String> = optional(&definition, "description")?;

    let config = PipelineConfig {
        approval_timeout_seconds: optional(&definition, "approval_timeout")?,
        env_vars: string_map(&definition, "env")?,
    };

    let stages: Table = definition
        .get("stages")
        .context("Pipeline must have a 'stages' field")?;

    let mut builder = PipelineBuilder::new(name).config(config);
    if let Some(description) = description {
        builder = builder.description(description);
    }

    for (position, stage) in stages.sequence_values::<Table>().enumerate() {
        let stage = stage.with_context(|| format!("Stage #{} must be a table", position + 1))?;

        let stage_name: String = stage
            .get("name")
            .with_context(|| format!("Stage #{} must have a 'name' field", position + 1))?;

        let actions = parse_stage_actions(&stage)
            .with_context(|| format!("Invalid stage '{}'", stage_name))?;

        builder.define_stage(stage_name, actions)?;
    }

    Ok(builder.build()?)
}

/// Reads `action = {...}` or `actions = { {...}, ... }`
fn parse_stage_actions(stage: &Table) -> Result<Vec<Action>> {
    let single: Option<Table> = optional(stage, "action")?;
    let many: Option<Table> = optional(stage, "actions")?;

    let tables = match (single, many) {
        (Some(action), None) => vec![action],
        (None, Some(actions)) => actions
            .sequence_values::<Table>()
            .collect::<mlua::Result<Vec<_>>>()
            .context("'actions' must be a list of action tables")?,
        (Some(_), Some(_)) => bail!("use either 'action' or 'actions', not both"),
        (None, None) => bail!("stage must have an 'action' or 'actions' field"),
    };

    tables.iter().map(parse_action).collect()
}

fn parse_action(table: &Table) -> Result<Action> {
    let name: String = table
        .get("name")
        .context("Action must have a 'name' field")?;

    let kind: String = table.get("type").with_context(|| {
        format!(
            "Action '{}' has no type; declare it with pipeline.source/build/deploy/approval",
            name
        )
    })?;

    let mut action = match kind.as_str() {
        "source" => {
            let repository: String = table
                .get("repository")
                .with_context(|| format!("Source action '{}' must have a 'repository'", name))?;
            let branch: String =
                optional(table, "branch")?.unwrap_or_else(|| "main".to_string());
            Action::source(name.clone(), repository, branch)
        }
        "build" => Action::build(name.clone(), parse_command_spec(&name, table)?),
        "deploy" => Action::deploy(name.clone(), parse_command_spec(&name, table)?),
        "approval" => Action::approval(
            name.clone(),
            ApprovalSpec {
                message: optional(table, "message")?,
                link: optional(table, "link")?,
                timeout_seconds: optional(table, "timeout")?,
            },
        ),
        other => bail!("Action '{}' has unknown type '{}'", name, other),
    };

    let mut inputs = string_list(table, "inputs")?;
    inputs.extend(string_list(table, "input")?);
    for input in inputs {
        action = action.input(input);
    }

    if let Some(output) = optional::<String>(table, "output")? {
        action = action.output(output);
    }

    Ok(action)
}

fn parse_command_spec(name: &str, table: &Table) -> Result<CommandSpec> {
    let image: String = table
        .get("image")
        .with_context(|| format!("Action '{}' must have an 'image'", name))?;

    let commands = string_list(table, "commands")?;

    let mut spec = CommandSpec::new(image, commands)
        .privileged(optional(table, "privileged")?.unwrap_or(false));

    spec.artifacts = string_list(table, "artifacts")?;
    spec.cache_paths = string_list(table, "cache")?;
    spec.env = string_map(table, "env")?;
    spec.target = optional(table, "target")?;

    Ok(spec)
}

// ============================================================================
// Field helpers
// ============================================================================

/// Reads an optional field, failing if it is present with the wrong type
fn optional<T: mlua::FromLua>(table: &Table, key: &str) -> Result<Option<T>> {
    table
        .get::<Option<T>>(key)
        .with_context(|| format!("Field '{}' has the wrong type", key))
}

/// Reads a string or a list of strings
fn string_list(table: &Table, key: &str) -> Result<Vec<String>> {
    let value: Value = table.get(key).unwrap_or(Value::Nil);

    match value {
        Value::Nil => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s.to_string_lossy()]),
        Value::Table(list) => list
            .sequence_values::<String>()
            .collect::<mlua::Result<Vec<_>>>()
            .with_context(|| format!("Field '{}' must be a list of strings", key)),
        _ => Err(anyhow!("Field '{}' must be a string or a list of strings", key)),
    }
}

/// Reads a table of string keys to string values
fn string_map(table: &Table, key: &str) -> Result<HashMap<String, String>> {
    let value: Value = table.get(key).unwrap_or(Value::Nil);

    match value {
        Value::Nil => Ok(HashMap::new()),
        Value::Table(map) => map
            .pairs::<String, String>()
            .collect::<mlua::Result<HashMap<_, _>>>()
            .with_context(|| format!("Field '{}' must map strings to strings", key)),
        _ => Err(anyhow!("Field '{}' must be a table", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::ConfigError;
    use conveyor_core::domain::pipeline::ActionKind;

    const FOUR_STAGES: &str = r#"
        return pipeline.define {
            name = "codeartifact-pipeline",
            description = "Build, approve and deploy",
            approval_timeout = 3600,
            env = { AWS_REGION = "eu-west-1" },
            stages = {
                pipeline.stage {
                    name = "Source",
                    action = pipeline.source {
                        name = "Source_CodeCommit",
                        repository = "codeartifact-repo",
                        branch = "main",
                        output = "source_output",
                    },
                },
                pipeline.stage {
                    name = "Build",
                    action = pipeline.build {
                        name = "Build_CodeBuild",
                        image = "amazonlinux:2",
                        privileged = true,
                        commands = { "mvn -s settings.xml compile" },
                        artifacts = { "*" },
                        cache = { "/root/.m2/**/*" },
                        input = "source_output",
                        output = "build_output",
                    },
                },
                pipeline.stage {
                    name = "Approve",
                    action = pipeline.approval {
                        name = "Manual_Approval",
                        message = "Check the staging build",
                    },
                },
                pipeline.stage {
                    name = "Deploy",
                    action = pipeline.deploy {
                        name = "Deploy_Lambda",
                        image = "amazonlinux:2",
                        commands = { "sam build", "sam deploy" },
                        target = "lambda:codeartifact",
                        input = "build_output",
                    },
                },
            },
        }
    "#;

    #[test]
    fn test_parse_four_stage_pipeline() {
        let pipeline = parse_pipeline(FOUR_STAGES).unwrap();

        assert_eq!(pipeline.name, "codeartifact-pipeline");
        assert_eq!(pipeline.config.approval_timeout_seconds, Some(3600));
        assert_eq!(pipeline.config.env_vars["AWS_REGION"], "eu-west-1");

        let names: Vec<_> = pipeline.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Source", "Build", "Approve", "Deploy"]);

        let build = &pipeline.stages[1].actions[0];
        assert_eq!(build.inputs, vec!["source_output"]);
        assert_eq!(build.output.as_deref(), Some("build_output"));
        let spec = build.kind.command_spec().unwrap();
        assert!(spec.privileged);
        assert_eq!(spec.cache_paths, vec!["/root/.m2/**/*"]);

        assert!(pipeline.stages[2].is_approval());

        let deploy = &pipeline.stages[3].actions[0];
        assert!(matches!(deploy.kind, ActionKind::DeployCommand(_)));
        assert_eq!(
            deploy.kind.command_spec().unwrap().target.as_deref(),
            Some("lambda:codeartifact")
        );
    }

    #[test]
    fn test_parse_multiple_actions() {
        let source = r#"
            return pipeline.define {
                name = "fan-out",
                stages = {
                    pipeline.stage { name = "Source", action = pipeline.source {
                        name = "checkout", repository = "app", output = "src" } },
                    pipeline.stage { name = "Build", actions = {
                        pipeline.build { name = "linux", image = "rust:1",
                            commands = "cargo build", inputs = { "src" }, output = "linux" },
                        pipeline.build { name = "lint", image = "rust:1",
                            commands = { "cargo clippy" }, input = "src" },
                    } },
                },
            }
        "#;

        let pipeline = parse_pipeline(source).unwrap();
        assert_eq!(pipeline.stages[1].actions.len(), 2);

        let ActionKind::SourceCheckout(source) = &pipeline.stages[0].actions[0].kind else {
            panic!("expected a source action");
        };
        assert_eq!(source.branch, "main");
    }

    #[test]
    fn test_dangling_input_surfaces_config_error() {
        let source = r#"
            return pipeline.define {
                name = "broken",
                stages = {
                    pipeline.stage { name = "Build", action = pipeline.build {
                        name = "compile", image = "alpine", commands = { "make" },
                        input = "source_output" } },
                },
            }
        "#;

        let err = parse_pipeline(source).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::DanglingInput { .. })
        ));
    }

    #[test]
    fn test_action_without_helper_is_rejected() {
        let source = r#"
            return pipeline.define {
                name = "untyped",
                stages = {
                    pipeline.stage { name = "Build", action = { name = "compile" } },
                },
            }
        "#;

        let err = parse_pipeline(source).unwrap_err();
        assert!(format!("{:#}", err).contains("no type"));
    }

    #[test]
    fn test_stage_with_action_and_actions() {
        let source = r#"
            return pipeline.define {
                name = "ambiguous",
                stages = {
                    pipeline.stage {
                        name = "Approve",
                        action = pipeline.approval { name = "a" },
                        actions = { pipeline.approval { name = "b" } },
                    },
                },
            }
        "#;

        let err = parse_pipeline(source).unwrap_err();
        assert!(format!("{:#}", err).contains("not both"));
    }

    #[test]
    fn test_missing_name_and_stages() {
        let err = parse_pipeline(r#"return { stages = {} }"#).unwrap_err();
        assert!(err.to_string().contains("name"));

        let err = parse_pipeline(r#"return { name = "x" }"#).unwrap_err();
        assert!(err.to_string().contains("stages"));

        let err = parse_pipeline(r#"return { name = "x", stages = {} }"#).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::EmptyPipeline)
        ));
    }

    #[test]
    fn test_wrong_field_type() {
        let source = r#"
            return pipeline.define {
                name = "typed",
                stages = {
                    pipeline.stage { name = "Build", action = pipeline.build {
                        name = "compile", image = "alpine", commands = 42 } },
                },
            }
        "#;

        assert!(parse_pipeline(source).is_err());
    }

    #[test]
    fn test_parse_bundled_codeartifact_pipeline() {
        let pipeline =
            parse_pipeline(include_str!("../../pipelines/codeartifact.lua")).unwrap();

        let names: Vec<_> = pipeline.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Source_CodeCommit",
                "Build_JAR_CodeArtifact",
                "Manual_Approval",
                "Deploy-to-Lambda"
            ]
        );

        let build = pipeline.stages[1].actions[0].kind.command_spec().unwrap();
        assert_eq!(build.env["CODEARTIFACT_DOMAIN"], "cdkpipelines-codeartifact");
        assert_eq!(build.artifacts, vec!["*"]);

        let deploy = &pipeline.stages[3].actions[0];
        assert_eq!(deploy.inputs, vec!["build_output"]);
        assert_eq!(
            deploy.kind.command_spec().unwrap().target.as_deref(),
            Some("lambda:codeartifact-test-function")
        );
    }

    #[test]
    fn test_parse_invalid_lua() {
        assert!(parse_pipeline("this is not valid lua!!!").is_err());
        assert!(parse_pipeline(r#"return "not a table""#).is_err());
    }
}
