//! Configuration module
//!
//! Handles CLI configuration including orchestrator URL and other settings.

use std::time::Duration;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the orchestrator service
    pub orchestrator_url: String,

    /// How often `pipeline run` polls the run state
    pub poll_interval: Duration,
}
