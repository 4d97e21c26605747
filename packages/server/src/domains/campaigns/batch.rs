//! Batch execution work functions.
//!
//! `run_batch` is what actually runs inside a serialized queue slot: it walks
//! the batch one item at a time (human pacing, no per-item parallelism),
//! retries each action under the backoff policy, feeds the circuit breaker,
//! persists job progress after every item, counts performed actions against
//! the daily quota, and converts detected resistance into a campaign
//! cooldown. Partial counts survive every abort path.
//!
//! `run_check` is the single-action variant used by the low-risk bypass jobs
//! (cookie/session checks).

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tracing::{error, warn};
use uuid::Uuid;

use crate::domains::campaigns::cooldown::{apply_cooldown, ResistanceKind};
use crate::domains::campaigns::model::Campaign;
use crate::domains::campaigns::quota;
use crate::kernel::backoff::{AttemptOutcome, RetryOutcome};
use crate::kernel::circuit::ConsecutiveFailureBreaker;
use crate::kernel::deps::AutomationDeps;
use crate::kernel::jobs::{
    ActivityLogEntry, ActivityOutcome, ErrorCategory, JobError, JobStatus,
};
use crate::kernel::notify::notify_best_effort;
use crate::kernel::traits::{ActionReport, ActionSpec};

/// Running counts for one batch. Persisted with every progress write and on
/// every abort path - partial results are never discarded.
#[derive(Debug, Clone, Copy)]
struct BatchTally {
    total: i32,
    processed: i32,
    succeeded: i32,
    failed: i32,
}

impl BatchTally {
    fn new(total: i32) -> Self {
        Self {
            total,
            processed: 0,
            succeeded: 0,
            failed: 0,
        }
    }

    fn progress(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.processed as f64 / self.total as f64
    }

    fn payload(&self) -> serde_json::Value {
        json!({
            "total": self.total,
            "processed": self.processed,
            "succeeded": self.succeeded,
            "failed": self.failed,
        })
    }
}

/// Map a failure text to the category a job is failed with.
fn categorize_failure_text(text: &str) -> ErrorCategory {
    if let Some(kind) = ResistanceKind::classify(text) {
        return kind.error_category();
    }
    let lower = text.to_lowercase();
    if lower.contains("cookie") {
        ErrorCategory::CookieLoadFailed
    } else if lower.contains("selector") || lower.contains("timed out") || lower.contains("timeout")
    {
        ErrorCategory::SelectorTimeout
    } else {
        ErrorCategory::Unknown
    }
}

/// Terminal (non-resistance) conditions where retrying a single action is
/// pointless without operator intervention.
fn is_terminal_failure(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("cookie") || lower.contains("manual intervention")
}

/// Run one action under the retry policy, classifying each attempt.
async fn perform_with_retry(
    deps: &AutomationDeps,
    action: &ActionSpec,
) -> RetryOutcome<ActionReport> {
    deps.retry
        .run(|_attempt| {
            let executor = deps.executor.clone();
            let action = action.clone();
            async move {
                match executor.perform(&action).await {
                    Ok(report) if report.success => AttemptOutcome::Success(report),
                    Ok(report) => {
                        let text = report.error_text().to_string();
                        if ResistanceKind::classify(&text).is_some() || is_terminal_failure(&text) {
                            AttemptOutcome::Fatal(text)
                        } else {
                            AttemptOutcome::Transient(anyhow::anyhow!(text))
                        }
                    }
                    Err(e) => AttemptOutcome::Transient(e),
                }
            }
        })
        .await
}

fn store_error(context: &str, e: anyhow::Error) -> anyhow::Error {
    JobError::new(
        ErrorCategory::DatabaseUpdateFailed,
        format!("{context}: {e}"),
    )
    .into()
}

async fn persist_progress(
    deps: &AutomationDeps,
    job_id: Uuid,
    tally: &BatchTally,
) -> Result<()> {
    deps.jobs
        .transition(job_id, JobStatus::InProgress, tally.progress())
        .await
        .map_err(|e| store_error("failed to persist job progress", e))
}

/// Persist the terminal failure state, close the activity entry, notify the
/// operator, and return the error the job's handle resolves with.
async fn fail_batch(
    deps: &AutomationDeps,
    job_id: Uuid,
    activity_id: Uuid,
    campaign: &Campaign,
    tally: &BatchTally,
    category: ErrorCategory,
    reason: &str,
    resistance: Option<ResistanceKind>,
    elapsed_ms: i64,
) -> anyhow::Error {
    let err = JobError::new(category, reason);

    if let Err(e) = deps.jobs.fail(job_id, category, &err.message).await {
        error!(job_id = %job_id, error = %e, "failed to persist job failure");
    }

    let mut outcome = ActivityOutcome::failed(
        tally.total,
        tally.succeeded,
        tally.failed,
        err.message.as_str(),
        json!({ "elapsed_ms": elapsed_ms, "processed": tally.processed }),
    );
    if let Some(kind) = resistance {
        outcome = outcome.with_resistance(kind);
    }
    if let Err(e) = deps
        .activity
        .record_completed(activity_id, outcome, deps.clock.now())
        .await
    {
        error!(job_id = %job_id, error = %e, "failed to close activity entry");
    }

    notify_best_effort(
        deps.notifier.as_ref(),
        &format!(
            "Job {} ({}) failed for campaign '{}': {} ({}/{} items processed, {} succeeded)",
            job_id,
            campaign.job_type.as_str(),
            campaign.name,
            err.message,
            tally.processed,
            tally.total,
            tally.succeeded,
        ),
    )
    .await;

    err.into()
}

/// Execute a batch of actions for a campaign inside its job lifecycle.
///
/// Returns the result payload persisted on the completed job, or the error
/// its terminal `Failed` state was recorded with.
pub async fn run_batch(
    deps: Arc<AutomationDeps>,
    job_id: Uuid,
    campaign: Campaign,
    targets: Vec<serde_json::Value>,
) -> Result<serde_json::Value> {
    let started_at = deps.clock.now();
    let mut tally = BatchTally::new(targets.len() as i32);

    deps.jobs
        .transition(job_id, JobStatus::Started, 0.0)
        .await
        .map_err(|e| store_error("failed to mark job started", e))?;

    let activity_id = deps
        .activity
        .record_started(ActivityLogEntry::running(
            campaign.id,
            campaign.job_type.as_str(),
            tally.total,
            started_at,
        ))
        .await
        .map_err(|e| store_error("failed to open activity entry", e))?;

    let mut breaker = ConsecutiveFailureBreaker::default();

    for target in targets {
        let action = ActionSpec {
            campaign_id: campaign.id,
            job_type: campaign.job_type,
            target,
        };

        let outcome = perform_with_retry(&deps, &action).await;
        tally.processed += 1;

        let item_succeeded = match outcome {
            RetryOutcome::Succeeded(_) => {
                tally.succeeded += 1;
                if campaign.job_type.consumes_quota() {
                    quota::record_performed(
                        deps.quotas.as_ref(),
                        &campaign,
                        deps.clock.now(),
                        1,
                    )
                    .await
                    .map_err(|e| store_error("failed to record quota usage", e))?;
                }
                true
            }
            RetryOutcome::Exhausted(item_error) => {
                tally.failed += 1;
                warn!(
                    job_id = %job_id,
                    campaign_id = %campaign.id,
                    error = %item_error,
                    "batch item failed after retries"
                );
                false
            }
            RetryOutcome::Aborted(reason) => {
                tally.failed += 1;
                persist_progress(&deps, job_id, &tally).await?;

                let elapsed = elapsed_ms(&deps, started_at);
                if let Some(kind) = ResistanceKind::classify(&reason) {
                    if let Err(e) = apply_cooldown(&deps, campaign.id, kind).await {
                        error!(campaign_id = %campaign.id, error = %e, "failed to apply cooldown");
                    }
                    return Err(fail_batch(
                        &deps,
                        job_id,
                        activity_id,
                        &campaign,
                        &tally,
                        kind.error_category(),
                        &reason,
                        Some(kind),
                        elapsed,
                    )
                    .await);
                }

                return Err(fail_batch(
                    &deps,
                    job_id,
                    activity_id,
                    &campaign,
                    &tally,
                    categorize_failure_text(&reason),
                    &reason,
                    None,
                    elapsed,
                )
                .await);
            }
        };

        persist_progress(&deps, job_id, &tally).await?;

        if breaker.record(item_succeeded) {
            let reason = format!(
                "{} consecutive item failures, aborting batch",
                breaker.consecutive_failures()
            );
            let elapsed = elapsed_ms(&deps, started_at);
            return Err(fail_batch(
                &deps,
                job_id,
                activity_id,
                &campaign,
                &tally,
                ErrorCategory::ConsecutiveFailures,
                &reason,
                None,
                elapsed,
            )
            .await);
        }
    }

    let payload = tally.payload();
    deps.jobs
        .complete(job_id, payload.clone())
        .await
        .map_err(|e| store_error("failed to mark job completed", e))?;

    let elapsed = elapsed_ms(&deps, started_at);
    if let Err(e) = deps
        .activity
        .record_completed(
            activity_id,
            ActivityOutcome::success(
                tally.total,
                tally.succeeded,
                tally.failed,
                json!({ "elapsed_ms": elapsed }),
            ),
            deps.clock.now(),
        )
        .await
    {
        error!(job_id = %job_id, error = %e, "failed to close activity entry");
    }

    notify_best_effort(
        deps.notifier.as_ref(),
        &format!(
            "Job {} ({}) completed for campaign '{}': {}/{} succeeded",
            job_id,
            campaign.job_type.as_str(),
            campaign.name,
            tally.succeeded,
            tally.total,
        ),
    )
    .await;

    Ok(payload)
}

/// Execute a single low-risk check action inside its job lifecycle.
///
/// Used by the bypass job types; same persistence discipline as `run_batch`,
/// one item.
pub async fn run_check(
    deps: Arc<AutomationDeps>,
    job_id: Uuid,
    campaign: Campaign,
    target: serde_json::Value,
) -> Result<serde_json::Value> {
    let started_at = deps.clock.now();
    let mut tally = BatchTally::new(1);

    deps.jobs
        .transition(job_id, JobStatus::Started, 0.0)
        .await
        .map_err(|e| store_error("failed to mark job started", e))?;

    let activity_id = deps
        .activity
        .record_started(ActivityLogEntry::running(
            campaign.id,
            campaign.job_type.as_str(),
            1,
            started_at,
        ))
        .await
        .map_err(|e| store_error("failed to open activity entry", e))?;

    let action = ActionSpec {
        campaign_id: campaign.id,
        job_type: campaign.job_type,
        target,
    };

    let outcome = perform_with_retry(&deps, &action).await;
    tally.processed = 1;

    let (reason, resistance) = match outcome {
        RetryOutcome::Succeeded(report) => {
            tally.succeeded = 1;
            let payload = json!({
                "success": true,
                "status": report.status,
            });
            deps.jobs
                .complete(job_id, payload.clone())
                .await
                .map_err(|e| store_error("failed to mark job completed", e))?;

            let elapsed = elapsed_ms(&deps, started_at);
            if let Err(e) = deps
                .activity
                .record_completed(
                    activity_id,
                    ActivityOutcome::success(1, 1, 0, json!({ "elapsed_ms": elapsed })),
                    deps.clock.now(),
                )
                .await
            {
                error!(job_id = %job_id, error = %e, "failed to close activity entry");
            }
            return Ok(payload);
        }
        RetryOutcome::Exhausted(item_error) => (item_error.to_string(), None),
        RetryOutcome::Aborted(reason) => {
            let resistance = ResistanceKind::classify(&reason);
            (reason, resistance)
        }
    };

    tally.failed = 1;
    if let Some(kind) = resistance {
        if let Err(e) = apply_cooldown(&deps, campaign.id, kind).await {
            error!(campaign_id = %campaign.id, error = %e, "failed to apply cooldown");
        }
    }

    let elapsed = elapsed_ms(&deps, started_at);
    Err(fail_batch(
        &deps,
        job_id,
        activity_id,
        &campaign,
        &tally,
        categorize_failure_text(&reason),
        &reason,
        resistance,
        elapsed,
    )
    .await)
}

fn elapsed_ms(deps: &AutomationDeps, started_at: chrono::DateTime<chrono::Utc>) -> i64 {
    (deps.clock.now() - started_at).num_milliseconds()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_progress_fraction() {
        let mut tally = BatchTally::new(4);
        assert_eq!(tally.progress(), 0.0);
        tally.processed = 2;
        assert_eq!(tally.progress(), 0.5);
        tally.processed = 4;
        assert_eq!(tally.progress(), 1.0);
    }

    #[test]
    fn empty_batch_reports_complete() {
        let tally = BatchTally::new(0);
        assert_eq!(tally.progress(), 1.0);
    }

    #[test]
    fn failure_text_maps_to_categories() {
        assert_eq!(
            categorize_failure_text("captcha challenge shown"),
            ErrorCategory::Captcha
        );
        assert_eq!(
            categorize_failure_text("HTTP 429 too many requests"),
            ErrorCategory::RateLimited
        );
        assert_eq!(
            categorize_failure_text("session expired, sign in again"),
            ErrorCategory::AuthenticationFailed
        );
        assert_eq!(
            categorize_failure_text("cookie jar could not be loaded"),
            ErrorCategory::CookieLoadFailed
        );
        assert_eq!(
            categorize_failure_text("selector .connect-button timed out"),
            ErrorCategory::SelectorTimeout
        );
        assert_eq!(
            categorize_failure_text("something exploded"),
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn terminal_failures_short_circuit_retries() {
        assert!(is_terminal_failure("cookies invalid, manual refresh needed"));
        assert!(is_terminal_failure("manual intervention required"));
        assert!(!is_terminal_failure("element not found"));
    }
}
