//! Chat webhook notification.
//!
//! Posts `{"text": <summary>}` to an incoming-webhook URL at the end of a run.

use crate::config::ReportConfig;
use crate::error::{AppResult, CanaryError};
use crate::procedures::result::{RunSummary, TestOutcome};
use crate::report::ReportSink;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, info};

/// Sends the run summary to a chat webhook.
pub struct WebhookReporter {
    url: String,
    notify_on_success: bool,
    client: reqwest::Client,
}

impl WebhookReporter {
    /// Create a reporter posting to `url` with the given request timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            notify_on_success: false,
            client,
        })
    }

    /// Build from the `[report]` section; `None` when no webhook is configured
    pub fn from_config(config: &ReportConfig) -> AppResult<Option<Self>> {
        match config.webhook_url.as_deref() {
            Some(url) if !url.trim().is_empty() => {
                let reporter = Self::new(url, Duration::from_secs(config.timeout_secs))?
                    .notify_on_success(config.notify_on_success);
                Ok(Some(reporter))
            }
            _ => Ok(None),
        }
    }

    /// Also post when every test passed
    pub fn notify_on_success(mut self, enabled: bool) -> Self {
        self.notify_on_success = enabled;
        self
    }

    /// Post `text` to the webhook
    pub async fn send(&self, text: &str) -> AppResult<()> {
        let payload = serde_json::json!({ "text": text });
        debug!(url = %self.url, "Sending webhook notification");

        let response = self.client.post(&self.url).json(&payload).send().await?;

        let status = response.status();
        if status.is_success() {
            info!(status = %status, "Webhook notification sent successfully");
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read response body>".to_string());
        error!(status = %status, response_body = %body, "Webhook notification failed");
        Err(CanaryError::WebhookStatus {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ReportSink for WebhookReporter {
    async fn report_outcome(&self, _outcome: &TestOutcome) -> AppResult<()> {
        Ok(())
    }

    async fn report_summary(&self, summary: &RunSummary) -> AppResult<()> {
        if summary.all_passed() && !self.notify_on_success {
            debug!("All tests passed, skipping webhook");
            return Ok(());
        }
        self.send(&summary.message()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_without_url() {
        let config = ReportConfig::default();
        assert!(WebhookReporter::from_config(&config).unwrap().is_none());

        let blank = ReportConfig {
            webhook_url: Some("  ".into()),
            ..ReportConfig::default()
        };
        assert!(WebhookReporter::from_config(&blank).unwrap().is_none());
    }
}
