//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! The scheduler owns exactly one recurring task: the campaign dispatch
//! tick. The tick body lives in `domains::campaigns::dispatch` and is called
//! in-process; tick failures are logged and never escape the scheduler.

use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::domains::campaigns::dispatch::dispatch_due_campaigns;
use crate::kernel::deps::AutomationDeps;
use crate::kernel::queue::ActionQueue;

/// Start the dispatch scheduler.
///
/// `cron` is a six-field cron expression (seconds included), e.g.
/// `"0 */15 * * * *"` for every 15 minutes.
pub async fn start_scheduler(
    deps: Arc<AutomationDeps>,
    queue: Arc<ActionQueue>,
    cron: &str,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let tick_deps = deps.clone();
    let tick_queue = queue.clone();
    let dispatch_job = Job::new_async(cron, move |_uuid, _lock| {
        let deps = tick_deps.clone();
        let queue = tick_queue.clone();
        Box::pin(async move {
            if let Err(e) = dispatch_due_campaigns(deps, queue).await {
                tracing::error!("campaign dispatch tick failed: {}", e);
            }
        })
    })?;

    scheduler.add(dispatch_job).await?;
    scheduler.start().await?;

    tracing::info!(cron = %cron, "campaign dispatch scheduler started");
    Ok(scheduler)
}
