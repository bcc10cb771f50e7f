//! Approval notifier
//!
//! Announces approval gates in the orchestrator log and, when configured,
//! POSTs the prompt as JSON to a webhook.

use async_trait::async_trait;
use conveyor_core::engine::{ApprovalNotifier, ApprovalRequest};
use std::time::Duration;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ApprovalPrompt {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl ApprovalPrompt {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }

    async fn post(&self, url: &str, request: &ApprovalRequest) -> Result<(), reqwest::Error> {
        self.client
            .post(url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(request)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

#[async_trait]
impl ApprovalNotifier for ApprovalPrompt {
    async fn notify(&self, request: &ApprovalRequest) {
        tracing::info!("{}", prompt_text(request));

        if let Some(url) = &self.webhook_url {
            match self.post(url, request).await {
                Ok(()) => tracing::debug!("Approval prompt for run {} sent to webhook", request.run_id),
                Err(e) => tracing::warn!(
                    "Failed to deliver approval prompt for run {}: {}",
                    request.run_id,
                    e
                ),
            }
        }
    }
}

/// Human-actionable text of an approval prompt
fn prompt_text(request: &ApprovalRequest) -> String {
    let mut text = format!(
        "Run {} of '{}' is waiting for approval at stage '{}' ({})",
        request.run_id, request.pipeline_name, request.stage, request.action
    );

    if let Some(message) = &request.message {
        text.push_str(&format!(": {}", message));
    }
    if let Some(link) = &request.link {
        text.push_str(&format!(" [{}]", link));
    }

    text.push_str(&format!(
        ". Decide with `conveyor pipeline approve {0}` or `conveyor pipeline reject {0}`",
        request.run_id
    ));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn request() -> ApprovalRequest {
        ApprovalRequest {
            run_id: Uuid::nil(),
            pipeline_name: "codeartifact-pipeline".to_string(),
            stage: "Approve".to_string(),
            action: "Manual_Approval".to_string(),
            message: None,
            link: None,
        }
    }

    #[test]
    fn test_prompt_names_run_and_commands() {
        let text = prompt_text(&request());

        assert!(text.contains("'codeartifact-pipeline'"));
        assert!(text.contains("stage 'Approve'"));
        assert!(text.contains(&format!("conveyor pipeline approve {}", Uuid::nil())));
        assert!(text.contains(&format!("conveyor pipeline reject {}", Uuid::nil())));
    }

    #[test]
    fn test_prompt_includes_message_and_link() {
        let mut req = request();
        req.message = Some("Release 1.4 to the package feed?".to_string());
        req.link = Some("https://ci.example.com/runs".to_string());

        let text = prompt_text(&req);
        assert!(text.contains(": Release 1.4 to the package feed?"));
        assert!(text.contains("[https://ci.example.com/runs]"));
    }

    #[tokio::test]
    async fn test_notify_without_webhook() {
        // Logging only, nothing to fail
        ApprovalPrompt::new(None).notify(&request()).await;
    }
}
