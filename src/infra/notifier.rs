//! Stage-completion notification sinks.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::info;

use crate::app::ports::Notifier;

/// POSTs `{"text": message}` to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(&json!({ "text": message }))
            .send()
            .await?
            .error_for_status()?;
        info!("Sent stage notification to {}", self.url);
        Ok(())
    }
}

/// Writes the message to the log instead of sending it anywhere.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> anyhow::Result<()> {
        info!(notification = %message, "Stage complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_notifier_never_fails() {
        LogNotifier.notify("Final datasets are built!").await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_webhook_is_an_error() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hooks/wofs").unwrap();
        assert!(notifier.notify("Matching to storm reports is finished!").await.is_err());
    }
}
