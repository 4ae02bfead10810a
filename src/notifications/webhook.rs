use super::{NotificationSink, PatchNotification};
use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Discord rejects message content longer than this
const MAX_CONTENT_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    /// Delay before the first retry, doubled on each further attempt
    pub initial_backoff: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 2,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookBody {
    content: String,
}

/// Posts `{"content": "<message>"}` to the target URL
pub struct WebhookNotifier {
    config: WebhookConfig,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { config, client })
    }

    fn body(notification: &PatchNotification) -> WebhookBody {
        let message = notification.message();
        let content = if message.chars().count() > MAX_CONTENT_CHARS {
            let mut truncated: String = message.chars().take(MAX_CONTENT_CHARS - 3).collect();
            truncated.push_str("...");
            truncated
        } else {
            message
        };
        WebhookBody { content }
    }

    async fn send_with_retry(&self, url: &str, notification: &PatchNotification) -> Result<()> {
        let body = serde_json::to_string(&Self::body(notification))
            .context("Failed to serialize webhook body")?;

        let mut last_error = None;
        let mut backoff = self.config.initial_backoff;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                debug!(
                    "Retrying webhook notification (attempt {}/{})",
                    attempt, self.config.max_retries
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            let request = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .body(body.clone());

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Webhook notification delivered");
                    return Ok(());
                },
                Ok(response) => {
                    let status = response.status();
                    warn!(
                        "Webhook returned status {}: {}",
                        status,
                        response
                            .text()
                            .await
                            .unwrap_or_else(|_| "Unable to read response".to_string())
                    );
                    last_error = Some(anyhow!("Webhook returned non-success status: {}", status));
                },
                Err(e) => {
                    warn!("Failed to send webhook notification: {}", e);
                    last_error = Some(anyhow!("HTTP request failed: {}", e));
                },
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("Webhook notification failed after all retries")))
    }
}

#[async_trait::async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify(&self, target: &str, notification: &PatchNotification) -> Result<()> {
        self.send_with_retry(target, notification).await
    }

    fn name(&self) -> &'static str {
        "Webhook"
    }
}
