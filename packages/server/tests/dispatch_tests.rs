//! Integration tests for the scheduler tick: cooldown gating, dispatch
//! windows, quota clamping, and end-to-end submission through the queue.

mod common;

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use common::TestHarness;
use outreach_core::common::Clock;
use outreach_core::domains::campaigns::cooldown::{CampaignCooldown, CooldownStore, ResistanceKind};
use outreach_core::domains::campaigns::quota::QuotaStore;
use outreach_core::domains::campaigns::Campaign;
use outreach_core::domains::campaigns::{
    dispatch_campaign, dispatch_due_campaigns, DispatchOutcome,
};
use outreach_core::kernel::jobs::{JobStatus, JobStore, JobType};

#[tokio::test]
async fn active_cooldown_blocks_dispatch_until_it_expires() {
    let h = TestHarness::new();
    let campaign = h.campaign(JobType::SendConnectionRequests, 50, 5);
    h.seed_targets(campaign.id, 10);

    h.cooldowns
        .put(&CampaignCooldown {
            campaign_id: campaign.id,
            cooldown_until: h.clock.now() + ChronoDuration::hours(2),
            resistance: ResistanceKind::RateLimit,
            updated_at: h.clock.now(),
        })
        .await
        .unwrap();

    let outcome = dispatch_campaign(&h.deps, &h.queue, &campaign).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::CoolingDown);
    assert!(h.jobs.all().is_empty());

    // Once the clock passes cooldown_until, dispatch resumes.
    h.clock.advance(ChronoDuration::hours(3));
    let outcome = dispatch_campaign(&h.deps, &h.queue, &campaign).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Submitted);
}

#[tokio::test]
async fn dispatch_respects_the_site_local_window() {
    let h = TestHarness::new();
    // Harness clock sits at 12:00 UTC; the window is 18-22 local.
    let campaign =
        Campaign::new("evening only", JobType::Scrape, "UTC", 50, 5, h.clock.now())
            .with_window(18, 22);
    h.campaigns.push_campaign(campaign.clone());
    h.seed_targets(campaign.id, 5);

    let outcome = dispatch_campaign(&h.deps, &h.queue, &campaign).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::OutsideWindow);

    h.clock.advance(ChronoDuration::hours(7)); // 19:00 UTC
    let outcome = dispatch_campaign(&h.deps, &h.queue, &campaign).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Submitted);
}

#[tokio::test]
async fn batch_size_is_clamped_to_remaining_quota() {
    let h = TestHarness::new();
    let campaign = h.campaign(JobType::SendConnectionRequests, 10, 8);
    h.seed_targets(campaign.id, 20);

    // 7 of 10 actions already used today: only 3 remain.
    let day = campaign.local_date(h.clock.now());
    h.quotas.add(campaign.id, day, 7).await.unwrap();

    let outcome = dispatch_campaign(&h.deps, &h.queue, &campaign).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Submitted);

    let jobs = h.jobs.all();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].batch_size, 3);

    // Let the batch run; afterwards the quota is exactly at the limit and
    // the next dispatch is refused.
    wait_until_terminal(&h, jobs[0].id).await;
    assert_eq!(h.quotas.count_for_day(campaign.id, day).await.unwrap(), 10);

    let outcome = dispatch_campaign(&h.deps, &h.queue, &campaign).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::QuotaExhausted);
}

#[tokio::test]
async fn campaigns_without_targets_are_skipped() {
    let h = TestHarness::new();
    let campaign = h.campaign(JobType::Scrape, 50, 5);

    let outcome = dispatch_campaign(&h.deps, &h.queue, &campaign).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::NoTargets);
    assert!(h.jobs.all().is_empty());
}

#[tokio::test]
async fn dispatched_job_runs_to_completion_through_the_queue() {
    let h = TestHarness::new();
    let campaign = h.campaign(JobType::Scrape, 50, 4);
    h.seed_targets(campaign.id, 4);

    let outcome = dispatch_campaign(&h.deps, &h.queue, &campaign).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Submitted);

    let jobs = h.jobs.all();
    assert_eq!(jobs.len(), 1);
    let job_id = jobs[0].id;

    wait_until_terminal(&h, job_id).await;
    let stored = h.jobs.find(job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.result.unwrap()["succeeded"], 4);
    assert_eq!(h.executor.performed_count(), 4);
}

#[tokio::test]
async fn dispatch_pass_tallies_every_campaign() {
    let h = TestHarness::new();

    // One dispatchable campaign, one cooling down, one without targets.
    let ready = h.campaign(JobType::Scrape, 50, 2);
    h.seed_targets(ready.id, 2);

    let cooling = h.campaign(JobType::SendConnectionRequests, 50, 2);
    h.seed_targets(cooling.id, 2);
    h.cooldowns
        .put(&CampaignCooldown {
            campaign_id: cooling.id,
            cooldown_until: h.clock.now() + ChronoDuration::hours(1),
            resistance: ResistanceKind::Captcha,
            updated_at: h.clock.now(),
        })
        .await
        .unwrap();

    let _empty = h.campaign(JobType::ScrapeCompanyData, 50, 2);

    let summary = dispatch_due_campaigns(h.deps.clone(), h.queue.clone())
        .await
        .unwrap();
    assert_eq!(summary.submitted, 1);
    assert_eq!(summary.cooling_down, 1);
    assert_eq!(summary.no_targets, 1);
    assert_eq!(summary.errors, 0);
}

/// Poll the job store until the job reaches a terminal status.
async fn wait_until_terminal(h: &TestHarness, job_id: uuid::Uuid) {
    for _ in 0..200 {
        if let Some(job) = h.jobs.find(job_id).await.unwrap() {
            if job.status.is_terminal() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {} never reached a terminal status", job_id);
}
