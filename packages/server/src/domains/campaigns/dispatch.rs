//! Campaign dispatch: the scheduler tick body.
//!
//! For every enabled campaign this consults cooldown state, the site-local
//! dispatch window, and the remaining daily quota, then sizes a batch and
//! submits it to the action queue as a direct in-process call. Per-campaign
//! failures are logged and never block the other campaigns.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::domains::campaigns::batch::run_batch;
use crate::domains::campaigns::model::Campaign;
use crate::domains::campaigns::quota;
use crate::kernel::deps::AutomationDeps;
use crate::kernel::jobs::JobRecord;
use crate::kernel::queue::{ActionQueue, JobMetadata};

/// Why a campaign was (or was not) dispatched this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Submitted,
    CoolingDown,
    OutsideWindow,
    QuotaExhausted,
    NoTargets,
}

/// Per-tick tally across all campaigns.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub submitted: usize,
    pub cooling_down: usize,
    pub outside_window: usize,
    pub quota_exhausted: usize,
    pub no_targets: usize,
    pub errors: usize,
}

impl DispatchSummary {
    fn count(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Submitted => self.submitted += 1,
            DispatchOutcome::CoolingDown => self.cooling_down += 1,
            DispatchOutcome::OutsideWindow => self.outside_window += 1,
            DispatchOutcome::QuotaExhausted => self.quota_exhausted += 1,
            DispatchOutcome::NoTargets => self.no_targets += 1,
        }
    }
}

/// Run one dispatch pass over all enabled campaigns.
pub async fn dispatch_due_campaigns(
    deps: Arc<AutomationDeps>,
    queue: Arc<ActionQueue>,
) -> Result<DispatchSummary> {
    let campaigns = deps.campaigns.list_active().await?;
    let mut summary = DispatchSummary::default();

    for campaign in campaigns {
        match dispatch_campaign(&deps, &queue, &campaign).await {
            Ok(outcome) => summary.count(outcome),
            Err(e) => {
                error!(
                    campaign_id = %campaign.id,
                    campaign = %campaign.name,
                    error = %e,
                    "campaign dispatch failed"
                );
                summary.errors += 1;
            }
        }
    }

    info!(
        submitted = summary.submitted,
        cooling_down = summary.cooling_down,
        outside_window = summary.outside_window,
        quota_exhausted = summary.quota_exhausted,
        no_targets = summary.no_targets,
        errors = summary.errors,
        "campaign dispatch pass complete"
    );
    Ok(summary)
}

/// Dispatch a single campaign, or report why it was skipped.
pub async fn dispatch_campaign(
    deps: &Arc<AutomationDeps>,
    queue: &Arc<ActionQueue>,
    campaign: &Campaign,
) -> Result<DispatchOutcome> {
    let now = deps.clock.now();

    if let Some(cooldown) = deps.cooldowns.current(campaign.id).await? {
        if cooldown.active_at(now) {
            debug!(
                campaign_id = %campaign.id,
                resistance = cooldown.resistance.as_str(),
                cooldown_until = %cooldown.cooldown_until,
                "campaign cooling down, skipping dispatch"
            );
            return Ok(DispatchOutcome::CoolingDown);
        }
    }

    if !campaign.window_contains(now) {
        return Ok(DispatchOutcome::OutsideWindow);
    }

    let batch = if campaign.job_type.consumes_quota() {
        let remaining = quota::remaining(deps.quotas.as_ref(), campaign, now).await?;
        quota::clamp_batch(campaign.batch_size as i64, remaining)
    } else {
        campaign.batch_size as i64
    };
    if batch == 0 {
        return Ok(DispatchOutcome::QuotaExhausted);
    }

    let targets = deps.campaigns.pending_targets(campaign.id, batch).await?;
    if targets.is_empty() {
        return Ok(DispatchOutcome::NoTargets);
    }

    let job = JobRecord::queued(
        campaign.id,
        campaign.job_type,
        targets.len() as i32,
        campaign.batch_size,
        now,
    );
    deps.jobs.create(&job).await?;

    let meta = JobMetadata::new(job.id, campaign.job_type, campaign.id);
    let job_id = job.id;
    let batch_len = targets.len();
    let work_deps = deps.clone();
    let work_campaign = campaign.clone();
    let handle = queue.submit(meta, move || {
        run_batch(work_deps, job_id, work_campaign, targets)
    });

    // The job persists its own terminal state; the handle is watched only so
    // failures land in the log.
    tokio::spawn(watch_handle(job_id, campaign.id, handle));

    info!(
        campaign_id = %campaign.id,
        campaign = %campaign.name,
        job_id = %job_id,
        job_type = campaign.job_type.as_str(),
        batch = batch_len,
        "campaign job submitted"
    );
    Ok(DispatchOutcome::Submitted)
}

async fn watch_handle(job_id: Uuid, campaign_id: Uuid, handle: crate::kernel::queue::JobHandle) {
    if let Err(e) = handle.join().await {
        debug!(
            job_id = %job_id,
            campaign_id = %campaign_id,
            error = %e,
            "campaign job settled with failure"
        );
    }
}
