//! ID resolver module
//!
//! Resolves UUID prefixes (and pipeline names) to full UUIDs by querying
//! the API, so users can type short references instead of full UUIDs.

use anyhow::{Context, Result, anyhow};
use uuid::Uuid;

use crate::types::IdOrPrefix;
use conveyor_client::OrchestratorClient;

/// Resolve a pipeline reference to its UUID
///
/// Accepts a full UUID, an unambiguous ID prefix or the exact pipeline
/// name. A name match wins over prefix matches.
pub async fn resolve_pipeline_id(client: &OrchestratorClient, reference: &str) -> Result<Uuid> {
    let id_or_prefix = IdOrPrefix::parse(reference);
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let pipelines = client
        .list_pipelines()
        .await
        .context("Failed to fetch pipelines for ID resolution")?;

    if let Some(pipeline) = pipelines.iter().find(|p| p.name == reference.trim()) {
        return Ok(pipeline.id);
    }

    unique_match(
        "pipeline",
        &id_or_prefix,
        pipelines.iter().map(|p| p.id),
    )
}

/// Resolve a run ID or prefix to a full UUID
pub async fn resolve_run_id(client: &OrchestratorClient, reference: &str) -> Result<Uuid> {
    let id_or_prefix = IdOrPrefix::parse(reference);
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let runs = client
        .list_runs(None)
        .await
        .context("Failed to fetch runs for ID resolution")?;

    unique_match("run", &id_or_prefix, runs.iter().map(|r| r.id))
}

/// Picks the single ID matched by `id_or_prefix`
fn unique_match(
    kind: &str,
    id_or_prefix: &IdOrPrefix,
    ids: impl Iterator<Item = Uuid>,
) -> Result<Uuid> {
    let matches: Vec<Uuid> = ids.filter(|id| id_or_prefix.matches(*id)).collect();

    match matches.as_slice() {
        [] => Err(anyhow!(
            "No {} found with ID starting with '{}'",
            kind,
            id_or_prefix
        )),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple {}s: {}",
                id_or_prefix,
                kind,
                ids.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> Vec<Uuid> {
        [
            "a1b2c3d4-0000-4000-8000-000000000001",
            "a1b2ffff-0000-4000-8000-000000000002",
            "b0000000-0000-4000-8000-000000000003",
        ]
        .iter()
        .map(|s| Uuid::parse_str(s).unwrap())
        .collect()
    }

    #[test]
    fn test_unique_prefix_resolves() {
        let id = unique_match("run", &IdOrPrefix::parse("a1b2c"), ids().into_iter()).unwrap();
        assert_eq!(id, ids()[0]);

        let id = unique_match("run", &IdOrPrefix::parse("b"), ids().into_iter()).unwrap();
        assert_eq!(id, ids()[2]);
    }

    #[test]
    fn test_ambiguous_prefix_lists_candidates() {
        let err = unique_match("run", &IdOrPrefix::parse("a1b2"), ids().into_iter()).unwrap_err();
        let message = err.to_string();

        assert!(message.contains("Ambiguous prefix 'a1b2' matches multiple runs"));
        assert!(message.contains(&ids()[0].to_string()));
        assert!(message.contains(&ids()[1].to_string()));
    }

    #[test]
    fn test_unknown_prefix() {
        let err = unique_match("pipeline", &IdOrPrefix::parse("ff"), ids().into_iter()).unwrap_err();
        assert!(err.to_string().contains("No pipeline found"));
    }
}
