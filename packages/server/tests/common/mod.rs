//! Shared harness for integration tests: in-memory stores, a scripted
//! executor, a recording notifier, and a manually-advanced clock.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use outreach_core::common::{Clock, ManualClock};
use outreach_core::domains::campaigns::Campaign;
use outreach_core::kernel::jobs::{JobRecord, JobStore, JobType};
use outreach_core::kernel::testing::{RecordingNotifier, ScriptedExecutor};
use outreach_core::kernel::{ActionQueue, AutomationDeps, RetryPolicy};
use outreach_core::storage::{
    InMemoryActivityLog, InMemoryCampaignStore, InMemoryCooldownStore, InMemoryJobStore,
    InMemoryQuotaStore,
};

pub struct TestHarness {
    pub deps: Arc<AutomationDeps>,
    pub queue: Arc<ActionQueue>,
    pub clock: Arc<ManualClock>,
    pub executor: Arc<ScriptedExecutor>,
    pub notifier: Arc<RecordingNotifier>,
    pub jobs: Arc<InMemoryJobStore>,
    pub activity: Arc<InMemoryActivityLog>,
    pub cooldowns: Arc<InMemoryCooldownStore>,
    pub quotas: Arc<InMemoryQuotaStore>,
    pub campaigns: Arc<InMemoryCampaignStore>,
}

impl TestHarness {
    /// Harness with single-attempt actions and a 1ms settle delay.
    pub fn new() -> Self {
        Self::with_retry(RetryPolicy::immediate(1))
    }

    pub fn with_retry(retry: RetryPolicy) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap(),
        ));
        let executor = Arc::new(ScriptedExecutor::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let jobs = Arc::new(InMemoryJobStore::new(clock.clone()));
        let activity = Arc::new(InMemoryActivityLog::new());
        let cooldowns = Arc::new(InMemoryCooldownStore::new());
        let quotas = Arc::new(InMemoryQuotaStore::new());
        let campaigns = Arc::new(InMemoryCampaignStore::new());

        let deps = Arc::new(AutomationDeps {
            jobs: jobs.clone(),
            activity: activity.clone(),
            cooldowns: cooldowns.clone(),
            quotas: quotas.clone(),
            campaigns: campaigns.clone(),
            executor: executor.clone(),
            notifier: notifier.clone(),
            clock: clock.clone(),
            retry,
        });
        let queue = Arc::new(ActionQueue::new(Duration::from_millis(1)));

        Self {
            deps,
            queue,
            clock,
            executor,
            notifier,
            jobs,
            activity,
            cooldowns,
            quotas,
            campaigns,
        }
    }

    /// Register a campaign and return it.
    pub fn campaign(&self, job_type: JobType, daily_limit: i64, batch_size: i32) -> Campaign {
        let campaign = Campaign::new(
            "test campaign",
            job_type,
            "UTC",
            daily_limit,
            batch_size,
            self.clock.now(),
        );
        self.campaigns.push_campaign(campaign.clone());
        campaign
    }

    /// Seed `count` pending targets for a campaign.
    pub fn seed_targets(&self, campaign_id: Uuid, count: usize) {
        self.campaigns.set_targets(
            campaign_id,
            (0..count)
                .map(|i| serde_json::json!({ "target": i }))
                .collect(),
        );
    }

    /// Create and persist a queued job for a campaign batch.
    pub async fn queued_job(&self, campaign: &Campaign, batch: i32) -> JobRecord {
        let job = JobRecord::queued(
            campaign.id,
            campaign.job_type,
            batch,
            campaign.batch_size,
            self.clock.now(),
        );
        self.jobs.create(&job).await.expect("failed to create job");
        job
    }
}
