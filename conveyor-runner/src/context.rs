//! Execution context for jobs
//!
//! Holds the per-job log buffer that the log sender drains and the host
//! workspace directory the job's container works in.

use conveyor_core::domain::log::{LogEntry, LogLevel};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Execution context shared between a running job and its log sender
pub struct Context {
    job_id: Uuid,
    workspace: PathBuf,
    log_buffer: Mutex<Vec<LogEntry>>,
}

impl Context {
    /// Creates a new execution context
    ///
    /// The workspace lives at `<workspace_base>/<job_id>` and is created by
    /// whoever first needs it.
    pub fn new(job_id: Uuid, workspace_base: &Path) -> Arc<Self> {
        Arc::new(Self {
            job_id,
            workspace: workspace_base.join(job_id.to_string()),
            log_buffer: Mutex::new(Vec::new()),
        })
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Adds a log entry to the buffer
    pub fn add_log(&self, entry: LogEntry) {
        self.buffer().push(entry);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.add_log(LogEntry::now(level, message));
    }

    pub fn log_info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn log_warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn log_error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    /// Drains all log entries from the buffer
    pub fn drain_logs(&self) -> Vec<LogEntry> {
        self.buffer().drain(..).collect()
    }

    /// Removes the workspace directory, if it was created
    pub fn remove_workspace(&self) {
        if self.workspace.exists()
            && let Err(e) = std::fs::remove_dir_all(&self.workspace)
        {
            tracing::warn!(
                "Failed to remove workspace {}: {}",
                self.workspace.display(),
                e
            );
        }
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        // A panic while pushing cannot leave the vector half-written
        self.log_buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_returns_entries_in_order() {
        let ctx = Context::new(Uuid::new_v4(), Path::new("/tmp"));
        ctx.log_info("first");
        ctx.log_warning("second");
        ctx.log_error("third");

        let logs = ctx.drain_logs();
        let messages: Vec<_> = logs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second", "third"]);
        assert_eq!(logs[1].level, LogLevel::Warning);

        assert!(ctx.drain_logs().is_empty());
    }

    #[test]
    fn test_workspace_is_per_job() {
        let job_id = Uuid::new_v4();
        let ctx = Context::new(job_id, Path::new("/var/lib/conveyor"));

        assert_eq!(
            ctx.workspace(),
            Path::new("/var/lib/conveyor").join(job_id.to_string())
        );
    }

    #[test]
    fn test_remove_workspace() {
        let base = tempfile::tempdir().unwrap();
        let ctx = Context::new(Uuid::new_v4(), base.path());
        std::fs::create_dir_all(ctx.workspace().join("dist")).unwrap();

        ctx.remove_workspace();
        assert!(!ctx.workspace().exists());

        // Nothing to remove is fine
        ctx.remove_workspace();
    }
}
