//! Artifact store
//!
//! Bundles live on a filesystem shared with the orchestrator, one directory
//! per bound artifact at `<root>/<run id>/<stage>/<artifact>`. The location
//! recorded in `ArtifactContent` is the path relative to the root.

use anyhow::{Context, Result};
use conveyor_core::artifact::ArtifactContent;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Handle to the artifact store root
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store key of an artifact produced by a stage of a run
    pub fn location(run_id: Uuid, stage: &str, artifact: &str) -> String {
        format!(
            "{}/{}/{}",
            run_id,
            path_component(stage),
            path_component(artifact)
        )
    }

    /// Host directory of a bundle
    pub fn path(&self, location: &str) -> PathBuf {
        self.root.join(location)
    }

    /// Creates an empty bundle directory, discarding what a previous attempt
    /// of the same stage left there
    pub fn prepare_bundle(&self, location: &str) -> Result<PathBuf> {
        let dir = self.path(location);

        if dir.exists() {
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to clear bundle {}", dir.display()))?;
        }
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create bundle {}", dir.display()))?;

        Ok(dir)
    }

    /// Describes a finished bundle
    pub fn content(&self, location: &str) -> Result<ArtifactContent> {
        Ok(ArtifactContent {
            location: location.to_string(),
            files: list_files(&self.path(location))?,
        })
    }

    /// Copies the files matching `patterns` from `workspace` into a fresh
    /// bundle
    ///
    /// Patterns are relative to the workspace; a matched directory brings
    /// its whole tree along. Fails when no pattern matched any file.
    pub fn collect(
        &self,
        workspace: &Path,
        patterns: &[String],
        location: &str,
    ) -> Result<ArtifactContent> {
        let matched = match_files(workspace, patterns)?;
        if matched.is_empty() {
            anyhow::bail!("No files match artifact patterns {:?}", patterns);
        }

        let bundle = self.prepare_bundle(location)?;
        for relative in &matched {
            let target = bundle.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(workspace.join(relative), &target)
                .with_context(|| format!("Failed to store {}", relative))?;
        }

        Ok(ArtifactContent {
            location: location.to_string(),
            files: matched,
        })
    }
}

/// Workspace-relative files matched by `patterns`, sorted and deduplicated
pub fn match_files(workspace: &Path, patterns: &[String]) -> Result<Vec<String>> {
    let base = glob::Pattern::escape(&workspace.to_string_lossy());
    let mut files = Vec::new();

    for pattern in patterns {
        let pattern = pattern.trim().trim_start_matches("./");
        let full = format!("{}/{}", base, pattern);

        let entries = glob::glob(&full)
            .with_context(|| format!("Invalid artifact pattern '{}'", pattern))?
            .filter_map(|entry| entry.ok());

        for entry in entries {
            if entry.is_dir() {
                for file in list_files(&entry)? {
                    files.push(relative_to(workspace, &entry.join(file)));
                }
            } else if entry.is_file() {
                files.push(relative_to(workspace, &entry));
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

/// Every file below `dir`, relative to it and sorted
pub fn list_files(dir: &Path) -> Result<Vec<String>> {
    let pattern = format!("{}/**/*", glob::Pattern::escape(&dir.to_string_lossy()));

    let mut files: Vec<String> = glob::glob(&pattern)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .map(|path| relative_to(dir, &path))
        .collect();

    files.sort();
    Ok(files)
}

/// Copies a directory tree into `dst`, creating it as needed
pub fn copy_tree(src: &Path, dst: &Path) -> Result<usize> {
    std::fs::create_dir_all(dst)?;

    let files = list_files(src)?;
    for relative in &files {
        let target = dst.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(src.join(relative), &target)
            .with_context(|| format!("Failed to copy {}", relative))?;
    }

    Ok(files.len())
}

/// Makes a name safe to use as a single path component
pub fn path_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

fn relative_to(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, relative: &str, contents: &str) {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_location_layout() {
        let run_id = Uuid::nil();
        assert_eq!(
            ArtifactStore::location(run_id, "Build", "build_output"),
            format!("{}/Build/build_output", run_id)
        );
        assert_eq!(
            ArtifactStore::location(run_id, "Deploy to prod", "../out"),
            format!("{}/Deploy_to_prod/.._out", run_id)
        );
    }

    #[test]
    fn test_path_component() {
        assert_eq!(path_component("source_output"), "source_output");
        assert_eq!(path_component("a/b"), "a_b");
        assert_eq!(path_component(".."), "_");
        assert_eq!(path_component(""), "_");
    }

    #[test]
    fn test_match_files_expands_directories() {
        let ws = TempDir::new().unwrap();
        touch(ws.path(), "dist/app.whl", "wheel");
        touch(ws.path(), "dist/nested/readme.txt", "docs");
        touch(ws.path(), "src/main.py", "print()");

        let files = match_files(ws.path(), &patterns(&["dist"])).unwrap();
        assert_eq!(files, vec!["dist/app.whl", "dist/nested/readme.txt"]);

        let files = match_files(ws.path(), &patterns(&["./dist/*.whl", "dist/**/*"])).unwrap();
        assert_eq!(files, vec!["dist/app.whl", "dist/nested/readme.txt"]);
    }

    #[test]
    fn test_match_files_star_takes_everything() {
        let ws = TempDir::new().unwrap();
        touch(ws.path(), "setup.py", "");
        touch(ws.path(), "pkg/__init__.py", "");

        let files = match_files(ws.path(), &patterns(&["*"])).unwrap();
        assert_eq!(files, vec!["pkg/__init__.py", "setup.py"]);
    }

    #[test]
    fn test_collect_copies_matches_into_bundle() {
        let ws = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        touch(ws.path(), "dist/app-1.0.tar.gz", "tarball");
        touch(ws.path(), "build.log", "noise");

        let store = ArtifactStore::new(root.path());
        let location = ArtifactStore::location(Uuid::new_v4(), "Build", "build_output");
        let content = store
            .collect(ws.path(), &patterns(&["dist/*"]), &location)
            .unwrap();

        assert_eq!(content.location, location);
        assert_eq!(content.files, vec!["dist/app-1.0.tar.gz"]);

        let stored = fs::read_to_string(store.path(&location).join("dist/app-1.0.tar.gz")).unwrap();
        assert_eq!(stored, "tarball");
        assert!(!store.path(&location).join("build.log").exists());
    }

    #[test]
    fn test_collect_without_matches_fails() {
        let ws = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        touch(ws.path(), "README.md", "");

        let store = ArtifactStore::new(root.path());
        let err = store
            .collect(ws.path(), &patterns(&["dist/*"]), "run/Build/out")
            .unwrap_err();

        assert!(err.to_string().contains("No files match"));
        assert!(!store.path("run/Build/out").exists());
    }

    #[test]
    fn test_prepare_bundle_discards_previous_attempt() {
        let root = TempDir::new().unwrap();
        let store = ArtifactStore::new(root.path());
        touch(&store.path("run/Source/src"), "stale.txt", "old");

        let dir = store.prepare_bundle("run/Source/src").unwrap();
        assert!(list_files(&dir).unwrap().is_empty());
    }

    #[test]
    fn test_copy_tree() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        touch(src.path(), "a.txt", "a");
        touch(src.path(), "deep/er/b.txt", "b");

        let target = dst.path().join("workspace");
        assert_eq!(copy_tree(src.path(), &target).unwrap(), 2);
        assert_eq!(fs::read_to_string(target.join("deep/er/b.txt")).unwrap(), "b");
    }
}
