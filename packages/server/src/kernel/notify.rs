//! Operator notification adapters.
//!
//! Notifications are strictly fire-and-forget: a dead webhook must never
//! fail a job, so callers go through [`notify_best_effort`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;

use super::traits::Notifier;

/// Posts alerts to a chat webhook (Slack-compatible `{"text": ...}` payload).
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .context("webhook request failed")?
            .error_for_status()
            .context("webhook rejected notification")?;
        Ok(())
    }
}

/// Swallows notifications; used when no webhook is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _text: &str) -> Result<()> {
        Ok(())
    }
}

/// Send a notification, logging (never propagating) failures.
pub async fn notify_best_effort(notifier: &dyn Notifier, text: &str) {
    if let Err(e) = notifier.notify(text).await {
        warn!(error = %e, "operator notification failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_notifier_always_succeeds() {
        assert!(NoopNotifier.notify("hello").await.is_ok());
    }

    #[tokio::test]
    async fn best_effort_swallows_failures() {
        struct FailingNotifier;

        #[async_trait]
        impl Notifier for FailingNotifier {
            async fn notify(&self, _text: &str) -> Result<()> {
                anyhow::bail!("channel down")
            }
        }

        // Must not panic or propagate.
        notify_best_effort(&FailingNotifier, "job failed").await;
    }
}
