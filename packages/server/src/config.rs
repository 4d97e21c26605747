use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Base URL of the browser worker that performs actions.
    pub browser_worker_url: String,
    /// Six-field cron expression for the campaign dispatch tick.
    pub dispatch_cron: String,
    /// Courtesy pause between serialized jobs, in milliseconds.
    pub queue_settle_delay_ms: u64,
    /// Optional webhook for operator notifications.
    pub notify_webhook_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            browser_worker_url: env::var("BROWSER_WORKER_URL")
                .context("BROWSER_WORKER_URL must be set")?,
            dispatch_cron: env::var("DISPATCH_CRON")
                .unwrap_or_else(|_| "0 */15 * * * *".to_string()),
            queue_settle_delay_ms: env::var("QUEUE_SETTLE_DELAY_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .context("QUEUE_SETTLE_DELAY_MS must be a valid number")?,
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").ok(),
        })
    }
}
