//! Conveyor HTTP Client
//!
//! A type-safe HTTP client for the Conveyor orchestrator API, shared by the
//! CLI and the runner.
//!
//! # Example
//!
//! ```no_run
//! use conveyor_client::OrchestratorClient;
//! use conveyor_core::dto::pipeline::CreatePipeline;
//!
//! #[tokio::main]
//! async fn main() -> conveyor_client::Result<()> {
//!     let client = OrchestratorClient::new("http://localhost:8080");
//!
//!     let pipeline = client
//!         .create_pipeline(CreatePipeline {
//!             definition: std::fs::read_to_string("pipelines/codeartifact.lua").unwrap(),
//!         })
//!         .await?;
//!
//!     let run = client.run_pipeline(pipeline.id).await?;
//!     println!("Started run {}", run.id);
//!     Ok(())
//! }
//! ```

pub mod error;
mod jobs;
mod pipelines;
mod runners;
mod runs;

pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Conveyor orchestrator API
///
/// Endpoints are grouped as:
/// - Pipeline management (create, list, get, delete, run)
/// - Runs (status, approve, reject, cancel, retry, logs)
/// - Job lifecycle for runners (poll, claim, complete, logs)
/// - Runner registration and heartbeats
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    client: Client,
}

impl OrchestratorClient {
    /// Create a new orchestrator client
    ///
    /// # Example
    /// ```
    /// use conveyor_client::OrchestratorClient;
    ///
    /// let client = OrchestratorClient::new("http://localhost:8080/");
    /// assert_eq!(client.base_url(), "http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new orchestrator client with a custom HTTP client
    ///
    /// Use it to configure timeouts, proxies or TLS settings.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            return Err(self.error_from(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Check the status code of a response without a body
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        if !response.status().is_success() {
            return Err(self.error_from(response).await);
        }

        Ok(())
    }

    async fn error_from(&self, response: reqwest::Response) -> ClientError {
        let status = response.status();
        let url = response.url().to_string();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        tracing::debug!("{} returned {}: {}", url, status, body);
        ClientError::from_body(status.as_u16(), &body)
    }
}
