// Main entry point for the outreach automation daemon

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use outreach_core::common::SystemClock;
use outreach_core::kernel::{
    ActionQueue, AutomationDeps, HttpActionExecutor, NoopNotifier, Notifier, RetryPolicy,
    WebhookNotifier,
};
use outreach_core::storage::{
    PostgresActivityLog, PostgresCampaignStore, PostgresCooldownStore, PostgresJobStore,
    PostgresQuotaStore,
};
use outreach_core::Config;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,outreach_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting outreach automation daemon");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Wire dependencies
    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(NoopNotifier),
    };
    let deps = Arc::new(AutomationDeps {
        jobs: Arc::new(PostgresJobStore::new(pool.clone())),
        activity: Arc::new(PostgresActivityLog::new(pool.clone())),
        cooldowns: Arc::new(PostgresCooldownStore::new(pool.clone())),
        quotas: Arc::new(PostgresQuotaStore::new(pool.clone())),
        campaigns: Arc::new(PostgresCampaignStore::new(pool.clone())),
        executor: Arc::new(
            HttpActionExecutor::new(config.browser_worker_url.clone())
                .context("Failed to build browser worker client")?,
        ),
        notifier,
        clock: Arc::new(SystemClock),
        retry: RetryPolicy::default(),
    });

    // Start the action queue and the dispatch scheduler
    let queue = Arc::new(ActionQueue::new(Duration::from_millis(
        config.queue_settle_delay_ms,
    )));
    let scheduler =
        outreach_core::kernel::start_scheduler(deps.clone(), queue.clone(), &config.dispatch_cron)
            .await
            .context("Failed to start dispatch scheduler")?;

    tracing::info!("Daemon running; press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    // Graceful shutdown: stop new dispatches, drain the queue.
    tracing::info!("Shutting down...");
    let mut scheduler = scheduler;
    scheduler
        .shutdown()
        .await
        .context("Failed to stop scheduler")?;
    queue.close();

    Ok(())
}
