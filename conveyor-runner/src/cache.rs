//! Build caches
//!
//! Cache paths of a command spec are kept across runs of the same stage.
//! Each one maps to a host directory below
//! `<cache root>/<pipeline>/<stage>/` that is mounted into the container.

use std::path::{Path, PathBuf};

use crate::podman::Mount;
use crate::store::path_component;

/// Turns a declared cache path into a directory path
///
/// Declarations are often written as globs (`"node_modules/**/*"`); only
/// the directory part is mountable. Returns `None` for paths that would
/// cover the whole workspace.
pub fn normalize_cache_path(raw: &str) -> Option<String> {
    let mut path = raw.trim();

    // Quoted declarations sometimes carry a stray trailing dot: '/root/.m2/**/*'.
    if let Some(stripped) = path.strip_suffix('.')
        && (stripped.ends_with('\'') || stripped.ends_with('"'))
    {
        path = stripped;
    }
    path = path.trim_matches(|c: char| c == '"' || c == '\'');

    for suffix in ["/**/*", "/**", "/*"] {
        if let Some(stripped) = path.strip_suffix(suffix) {
            path = stripped;
            break;
        }
    }

    let path = path.trim_end_matches('*').trim_end_matches('/');
    let path = path.strip_prefix("./").unwrap_or(path);

    match path {
        "" | "." => None,
        _ => Some(path.to_string()),
    }
}

/// Where a normalized cache path lives inside the container
pub fn container_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/workspace/{}", path)
    }
}

/// Host directory backing a cache path of a stage
pub fn host_dir(cache_root: &Path, pipeline: &str, stage: &str, path: &str) -> PathBuf {
    let key = path_component(path.trim_start_matches('/'));

    cache_root
        .join(path_component(pipeline))
        .join(path_component(stage))
        .join(key)
}

/// Resolves the cache mounts of a stage, creating their host directories
pub fn mounts(
    cache_root: &Path,
    pipeline: &str,
    stage: &str,
    cache_paths: &[String],
) -> anyhow::Result<Vec<Mount>> {
    let mut mounts = Vec::new();

    for raw in cache_paths {
        let Some(path) = normalize_cache_path(raw) else {
            tracing::warn!("Ignoring cache path '{}': it covers the whole workspace", raw);
            continue;
        };

        let host = host_dir(cache_root, pipeline, stage, &path);
        std::fs::create_dir_all(&host)?;

        mounts.push(Mount::read_write(host, container_path(&path)));
    }

    Ok(mounts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_cache_path() {
        assert_eq!(normalize_cache_path("node_modules/**/*").as_deref(), Some("node_modules"));
        assert_eq!(normalize_cache_path("'/root/.m2/**/*'").as_deref(), Some("/root/.m2"));
        assert_eq!(normalize_cache_path("'/root/.m2/**/*'.").as_deref(), Some("/root/.m2"));
        assert_eq!(normalize_cache_path("\"./.venv/\"").as_deref(), Some(".venv"));
        assert_eq!(normalize_cache_path("target/*").as_deref(), Some("target"));
        assert_eq!(normalize_cache_path("vendor").as_deref(), Some("vendor"));
        assert_eq!(normalize_cache_path("."), None);
        assert_eq!(normalize_cache_path("**/*"), None);
        assert_eq!(normalize_cache_path("*"), None);
    }

    #[test]
    fn test_container_path() {
        assert_eq!(container_path("node_modules"), "/workspace/node_modules");
        assert_eq!(container_path("/root/.cache/pip"), "/root/.cache/pip");
    }

    #[test]
    fn test_host_dir_is_scoped_to_stage() {
        let root = Path::new("/cache");

        assert_eq!(
            host_dir(root, "codeartifact-pipeline", "Build", "/root/.cache/pip"),
            PathBuf::from("/cache/codeartifact-pipeline/Build/root_.cache_pip")
        );
        assert_ne!(
            host_dir(root, "p", "Build", "node_modules"),
            host_dir(root, "p", "Deploy", "node_modules")
        );
    }

    #[test]
    fn test_mounts_create_host_dirs() {
        let root = tempfile::tempdir().unwrap();
        let paths = vec!["node_modules/**/*".to_string(), "./".to_string()];

        let mounts = mounts(root.path(), "release", "Build", &paths).unwrap();

        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].target, "/workspace/node_modules");
        assert!(mounts[0].source.is_dir());
    }
}
