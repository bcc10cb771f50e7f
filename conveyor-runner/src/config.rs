//! Runner configuration
//!
//! Polling intervals, orchestrator connection and the host directories the
//! runner works in.

use std::path::PathBuf;
use std::time::Duration;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this runner instance
    pub runner_id: String,

    /// Orchestrator base URL (e.g., "http://localhost:8080")
    pub orchestrator_url: String,

    /// How often to poll the orchestrator for new jobs
    pub poll_interval: Duration,

    /// How often to send buffered logs to the orchestrator
    pub log_send_interval: Duration,

    /// Maximum time a job can run before timing out
    pub job_timeout: Duration,

    /// Max parallel jobs the runner can handle
    pub max_parallel_jobs: usize,

    /// Per-job workspaces are created below this directory
    pub workspace_base: PathBuf,

    /// Root of the artifact store shared with the orchestrator
    pub artifact_root: PathBuf,

    /// Root of the per-stage build caches
    pub cache_root: PathBuf,

    /// Image used for source checkouts
    pub git_image: String,

    /// Repositories are cloned from `<source_base_url>/<repository>`
    pub source_base_url: String,

    /// Whether this runner accepts jobs asking for a privileged environment
    pub allow_privileged: bool,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(runner_id: String, orchestrator_url: String) -> Self {
        let base = std::env::temp_dir().join("conveyor");

        Self {
            runner_id,
            orchestrator_url,
            poll_interval: Duration::from_secs(5),
            log_send_interval: Duration::from_secs(5),
            job_timeout: Duration::from_secs(3600),
            max_parallel_jobs: 2,
            workspace_base: base.join("workspaces"),
            artifact_root: base.join("artifacts"),
            cache_root: base.join("cache"),
            git_image: "docker.io/alpine/git:latest".to_string(),
            source_base_url: "https://github.com".to_string(),
            allow_privileged: false,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - RUNNER_ID (required)
    /// - ORCHESTRATOR_URL (required)
    /// - POLL_INTERVAL (optional, seconds, default: 5)
    /// - LOG_SEND_INTERVAL (optional, seconds, default: 5)
    /// - JOB_TIMEOUT (optional, seconds, default: 3600)
    /// - MAX_PARALLEL_JOBS (optional, default: 2)
    /// - WORKSPACE_BASE, ARTIFACT_ROOT, CACHE_ROOT (optional, directories)
    /// - GIT_IMAGE (optional, default: docker.io/alpine/git:latest)
    /// - SOURCE_BASE_URL (optional, default: https://github.com)
    /// - ALLOW_PRIVILEGED (optional, default: false)
    pub fn from_env() -> anyhow::Result<Self> {
        let runner_id = std::env::var("RUNNER_ID")
            .map_err(|_| anyhow::anyhow!("RUNNER_ID environment variable not set"))?;

        let orchestrator_url = std::env::var("ORCHESTRATOR_URL")
            .map_err(|_| anyhow::anyhow!("ORCHESTRATOR_URL environment variable not set"))?;

        let mut config = Self::new(runner_id, orchestrator_url);

        if let Some(secs) = env_parse::<u64>("POLL_INTERVAL") {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("LOG_SEND_INTERVAL") {
            config.log_send_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("JOB_TIMEOUT") {
            config.job_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = env_parse::<usize>("MAX_PARALLEL_JOBS") {
            config.max_parallel_jobs = max;
        }
        if let Ok(dir) = std::env::var("WORKSPACE_BASE") {
            config.workspace_base = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("ARTIFACT_ROOT") {
            config.artifact_root = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("CACHE_ROOT") {
            config.cache_root = PathBuf::from(dir);
        }
        if let Ok(image) = std::env::var("GIT_IMAGE") {
            config.git_image = image;
        }
        if let Ok(url) = std::env::var("SOURCE_BASE_URL") {
            config.source_base_url = url;
        }
        if let Some(allow) = env_parse::<bool>("ALLOW_PRIVILEGED") {
            config.allow_privileged = allow;
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.runner_id.is_empty() {
            anyhow::bail!("runner_id cannot be empty");
        }

        if self.orchestrator_url.is_empty() {
            anyhow::bail!("orchestrator_url cannot be empty");
        }

        if !self.orchestrator_url.starts_with("http://")
            && !self.orchestrator_url.starts_with("https://")
        {
            anyhow::bail!("orchestrator_url must start with http:// or https://");
        }

        if self.poll_interval.as_secs() == 0 {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.log_send_interval.as_secs() == 0 {
            anyhow::bail!("log_send_interval must be greater than 0");
        }

        if self.job_timeout.as_secs() == 0 {
            anyhow::bail!("job_timeout must be greater than 0");
        }

        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }

        if self.git_image.trim().is_empty() {
            anyhow::bail!("git_image cannot be empty");
        }

        if self.source_base_url.trim().is_empty() {
            anyhow::bail!("source_base_url cannot be empty");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            "http://localhost:8080".to_string(),
        )
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.job_timeout, Duration::from_secs(3600));
        assert_eq!(config.git_image, "docker.io/alpine/git:latest");
        assert!(!config.allow_privileged);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Valid config should pass
        assert!(config.validate().is_ok());

        // Empty runner_id should fail
        config.runner_id = String::new();
        assert!(config.validate().is_err());

        config.runner_id = "test".to_string();

        // Invalid URL should fail
        config.orchestrator_url = "not-a-url".to_string();
        assert!(config.validate().is_err());

        config.orchestrator_url = "http://localhost:8080".to_string();
        assert!(config.validate().is_ok());

        config.max_parallel_jobs = 0;
        assert!(config.validate().is_err());
        config.max_parallel_jobs = 1;

        config.job_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_directories_share_a_base() {
        let config = Config::default();
        let base = config.workspace_base.parent().unwrap();

        assert_eq!(config.artifact_root.parent(), Some(base));
        assert_eq!(config.cache_root.parent(), Some(base));
    }
}
