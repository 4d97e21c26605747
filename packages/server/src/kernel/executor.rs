//! HTTP adapter for the browser action executor.
//!
//! The browser automation runs as a separate worker process (it holds the
//! headless browser and the site selectors). This adapter forwards one
//! [`ActionSpec`] per request and maps the response into an
//! [`ActionReport`]. Timeouts and transport failures surface as errors and
//! are treated by the batch runner as that action's failure.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::traits::{ActionExecutor, ActionReport, ActionSpec};

/// Default per-action timeout. Expiry is that call's failure, never a
/// whole-job timeout.
const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(120);

/// Performs actions by POSTing them to the browser worker.
pub struct HttpActionExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpActionExecutor {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_ACTION_TIMEOUT)
            .build()
            .context("failed to build browser worker client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ActionExecutor for HttpActionExecutor {
    async fn perform(&self, action: &ActionSpec) -> Result<ActionReport> {
        let url = format!("{}/perform", self.base_url.trim_end_matches('/'));
        let report = self
            .client
            .post(&url)
            .json(action)
            .send()
            .await
            .context("browser worker request failed")?
            .error_for_status()
            .context("browser worker rejected action")?
            .json::<ActionReport>()
            .await
            .context("browser worker returned malformed report")?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_trailing_slash_tolerated() {
        let executor = HttpActionExecutor::new("http://localhost:9222/").unwrap();
        assert!(executor.base_url.ends_with('/'));
    }
}
