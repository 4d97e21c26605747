//! In-memory store adapters.
//!
//! Back the test suite and local runs. Same contracts as the PostgreSQL
//! adapters: lifecycle rules enforced through `JobRecord::advance`, terminal
//! activity entries written once, quota adds atomic (a single mutex guards
//! each map, so concurrent increments never lose updates).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::common::Clock;
use crate::domains::campaigns::cooldown::{CampaignCooldown, CooldownStore};
use crate::domains::campaigns::model::{Campaign, CampaignStore};
use crate::domains::campaigns::quota::QuotaStore;
use crate::kernel::jobs::{
    truncate_error, ActivityLog, ActivityLogEntry, ActivityOutcome, ActivityStatus, ErrorCategory,
    JobRecord, JobStatus, JobStore,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Jobs
// ============================================================================

/// In-memory job store that also keeps a per-job transition history, so
/// tests can assert on the exact sequence of persisted states.
pub struct InMemoryJobStore {
    clock: Arc<dyn Clock>,
    jobs: Mutex<HashMap<Uuid, JobRecord>>,
    history: Mutex<HashMap<Uuid, Vec<(JobStatus, f64)>>>,
}

impl InMemoryJobStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            jobs: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Every `(status, progress)` pair persisted for a job, in write order.
    pub fn transition_history(&self, id: Uuid) -> Vec<(JobStatus, f64)> {
        lock(&self.history).get(&id).cloned().unwrap_or_default()
    }

    /// All stored job records.
    pub fn all(&self) -> Vec<JobRecord> {
        lock(&self.jobs).values().cloned().collect()
    }

    fn record_history(&self, id: Uuid, status: JobStatus, progress: f64) {
        lock(&self.history)
            .entry(id)
            .or_default()
            .push((status, progress));
    }

    fn update<F>(&self, id: Uuid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut JobRecord) -> Result<()>,
    {
        let mut jobs = lock(&self.jobs);
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| anyhow!("job {} not found", id))?;
        apply(job)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &JobRecord) -> Result<()> {
        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(&job.id) {
            bail!("job {} already exists", job.id);
        }
        jobs.insert(job.id, job.clone());
        drop(jobs);
        self.record_history(job.id, job.status, job.progress);
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<JobRecord>> {
        Ok(lock(&self.jobs).get(&id).cloned())
    }

    async fn transition(&self, id: Uuid, status: JobStatus, progress: f64) -> Result<()> {
        let now = self.clock.now();
        self.update(id, |job| {
            job.advance(status, progress, now)?;
            Ok(())
        })?;
        self.record_history(id, status, progress);
        Ok(())
    }

    async fn complete(&self, id: Uuid, result: serde_json::Value) -> Result<()> {
        let now = self.clock.now();
        self.update(id, |job| {
            job.advance(JobStatus::Completed, 1.0, now)?;
            job.result = Some(result);
            Ok(())
        })?;
        self.record_history(id, JobStatus::Completed, 1.0);
        Ok(())
    }

    async fn fail(&self, id: Uuid, category: ErrorCategory, error: &str) -> Result<()> {
        let now = self.clock.now();
        let mut final_progress = 0.0;
        self.update(id, |job| {
            let progress = job.progress;
            job.advance(JobStatus::Failed, progress, now)?;
            job.error_category = Some(category);
            job.error_message = Some(truncate_error(error));
            final_progress = progress;
            Ok(())
        })?;
        self.record_history(id, JobStatus::Failed, final_progress);
        Ok(())
    }
}

// ============================================================================
// Activity log
// ============================================================================

#[derive(Default)]
pub struct InMemoryActivityLog {
    entries: Mutex<Vec<ActivityLogEntry>>,
}

impl InMemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries, in insertion order.
    pub fn entries(&self) -> Vec<ActivityLogEntry> {
        lock(&self.entries).clone()
    }
}

#[async_trait]
impl ActivityLog for InMemoryActivityLog {
    async fn record_started(&self, entry: ActivityLogEntry) -> Result<Uuid> {
        let id = entry.id;
        lock(&self.entries).push(entry);
        Ok(id)
    }

    async fn record_completed(
        &self,
        entry_id: Uuid,
        outcome: ActivityOutcome,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut entries = lock(&self.entries);
        let entry = entries
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or_else(|| anyhow!("activity entry {} not found", entry_id))?;
        if entry.status != ActivityStatus::Running {
            bail!("activity entry {} is already terminal", entry_id);
        }
        entry.status = outcome.status;
        entry.total = outcome.total;
        entry.succeeded = outcome.succeeded;
        entry.failed = outcome.failed;
        entry.error = outcome.error;
        entry.resistance = outcome.resistance;
        entry.details = outcome.details;
        entry.completed_at = Some(completed_at);
        Ok(())
    }

    async fn resistance_incidents_since(
        &self,
        campaign_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let count = lock(&self.entries)
            .iter()
            .filter(|e| {
                e.campaign_id == campaign_id
                    && e.resistance.is_some()
                    && e.completed_at.map(|at| at >= since).unwrap_or(false)
            })
            .count();
        Ok(count as i64)
    }
}

// ============================================================================
// Cooldowns
// ============================================================================

#[derive(Default)]
pub struct InMemoryCooldownStore {
    cooldowns: Mutex<HashMap<Uuid, CampaignCooldown>>,
}

impl InMemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CooldownStore for InMemoryCooldownStore {
    async fn current(&self, campaign_id: Uuid) -> Result<Option<CampaignCooldown>> {
        Ok(lock(&self.cooldowns).get(&campaign_id).cloned())
    }

    async fn put(&self, cooldown: &CampaignCooldown) -> Result<()> {
        lock(&self.cooldowns).insert(cooldown.campaign_id, cooldown.clone());
        Ok(())
    }
}

// ============================================================================
// Quotas
// ============================================================================

#[derive(Default)]
pub struct InMemoryQuotaStore {
    counts: Mutex<HashMap<(Uuid, NaiveDate), i64>>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn count_for_day(&self, campaign_id: Uuid, day: NaiveDate) -> Result<i64> {
        Ok(*lock(&self.counts).get(&(campaign_id, day)).unwrap_or(&0))
    }

    async fn add(&self, campaign_id: Uuid, day: NaiveDate, amount: i64) -> Result<i64> {
        let mut counts = lock(&self.counts);
        let count = counts.entry((campaign_id, day)).or_insert(0);
        *count += amount;
        Ok(*count)
    }
}

// ============================================================================
// Campaigns
// ============================================================================

#[derive(Default)]
pub struct InMemoryCampaignStore {
    campaigns: Mutex<Vec<Campaign>>,
    targets: Mutex<HashMap<Uuid, Vec<serde_json::Value>>>,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_campaign(&self, campaign: Campaign) {
        lock(&self.campaigns).push(campaign);
    }

    /// Replace the pending targets for a campaign.
    pub fn set_targets(&self, campaign_id: Uuid, targets: Vec<serde_json::Value>) {
        lock(&self.targets).insert(campaign_id, targets);
    }
}

#[async_trait]
impl CampaignStore for InMemoryCampaignStore {
    async fn list_active(&self) -> Result<Vec<Campaign>> {
        Ok(lock(&self.campaigns)
            .iter()
            .filter(|c| c.enabled)
            .cloned()
            .collect())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Campaign>> {
        Ok(lock(&self.campaigns).iter().find(|c| c.id == id).cloned())
    }

    async fn pending_targets(
        &self,
        campaign_id: Uuid,
        limit: i64,
    ) -> Result<Vec<serde_json::Value>> {
        Ok(lock(&self.targets)
            .get(&campaign_id)
            .map(|targets| targets.iter().take(limit.max(0) as usize).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SystemClock;
    use crate::kernel::jobs::JobType;

    fn job_store() -> InMemoryJobStore {
        InMemoryJobStore::new(Arc::new(SystemClock))
    }

    fn queued_job() -> JobRecord {
        JobRecord::queued(Uuid::new_v4(), JobType::Scrape, 10, 100, Utc::now())
    }

    #[tokio::test]
    async fn job_store_round_trips_records() {
        let store = job_store();
        let job = queued_job();
        store.create(&job).await.unwrap();

        let found = store.find(job.id).await.unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn job_store_rejects_duplicate_create() {
        let store = job_store();
        let job = queued_job();
        store.create(&job).await.unwrap();
        assert!(store.create(&job).await.is_err());
    }

    #[tokio::test]
    async fn job_store_enforces_lifecycle() {
        let store = job_store();
        let job = queued_job();
        store.create(&job).await.unwrap();

        store.transition(job.id, JobStatus::Started, 0.0).await.unwrap();
        store
            .transition(job.id, JobStatus::InProgress, 0.5)
            .await
            .unwrap();

        // Progress regression refused.
        assert!(store
            .transition(job.id, JobStatus::InProgress, 0.25)
            .await
            .is_err());

        store
            .complete(job.id, serde_json::json!({"ok": true}))
            .await
            .unwrap();

        // Terminal is final.
        assert!(store
            .transition(job.id, JobStatus::InProgress, 1.0)
            .await
            .is_err());

        let history = store.transition_history(job.id);
        assert_eq!(
            history,
            vec![
                (JobStatus::Queued, 0.0),
                (JobStatus::Started, 0.0),
                (JobStatus::InProgress, 0.5),
                (JobStatus::Completed, 1.0),
            ]
        );
    }

    #[tokio::test]
    async fn job_store_fail_keeps_progress_and_truncates() {
        let store = job_store();
        let job = queued_job();
        store.create(&job).await.unwrap();
        store.transition(job.id, JobStatus::Started, 0.0).await.unwrap();
        store
            .transition(job.id, JobStatus::InProgress, 0.4)
            .await
            .unwrap();

        let long_error = "boom ".repeat(1000);
        store
            .fail(job.id, ErrorCategory::Unknown, &long_error)
            .await
            .unwrap();

        let failed = store.find(job.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.progress, 0.4);
        assert!(failed.error_message.unwrap().len() <= 500);
        assert_eq!(failed.error_category, Some(ErrorCategory::Unknown));
    }

    #[tokio::test]
    async fn activity_log_is_append_only() {
        let log = InMemoryActivityLog::new();
        let entry = ActivityLogEntry::running(Uuid::new_v4(), "scrape", 5, Utc::now());
        let id = log.record_started(entry).await.unwrap();

        log.record_completed(
            id,
            ActivityOutcome::success(5, 5, 0, serde_json::Value::Null),
            Utc::now(),
        )
        .await
        .unwrap();

        // A second terminal write is refused.
        let err = log
            .record_completed(
                id,
                ActivityOutcome::success(5, 5, 0, serde_json::Value::Null),
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("terminal"));
    }

    #[tokio::test]
    async fn quota_store_concurrent_increments_do_not_lose_updates() {
        let store = Arc::new(InMemoryQuotaStore::new());
        let campaign_id = Uuid::new_v4();
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.add(campaign_id, day, 1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.count_for_day(campaign_id, day).await.unwrap(), 32);
    }

    #[tokio::test]
    async fn cooldown_store_last_write_wins() {
        let store = InMemoryCooldownStore::new();
        let campaign_id = Uuid::new_v4();
        let now = Utc::now();

        let long = CampaignCooldown {
            campaign_id,
            cooldown_until: now + chrono::Duration::hours(12),
            resistance: crate::domains::campaigns::ResistanceKind::SuspiciousActivity,
            updated_at: now,
        };
        let short = CampaignCooldown {
            campaign_id,
            cooldown_until: now + chrono::Duration::hours(1),
            resistance: crate::domains::campaigns::ResistanceKind::Authentication,
            updated_at: now,
        };

        store.put(&long).await.unwrap();
        store.put(&short).await.unwrap();

        // The newer, shorter cooldown wins.
        let current = store.current(campaign_id).await.unwrap().unwrap();
        assert_eq!(current.cooldown_until, short.cooldown_until);
    }

    #[tokio::test]
    async fn campaign_store_limits_targets() {
        let store = InMemoryCampaignStore::new();
        let campaign = Campaign::new(
            "test",
            JobType::SendConnectionRequests,
            "UTC",
            50,
            10,
            Utc::now(),
        );
        let id = campaign.id;
        store.push_campaign(campaign);
        store.set_targets(
            id,
            (0..10).map(|i| serde_json::json!({ "n": i })).collect(),
        );

        let targets = store.pending_targets(id, 3).await.unwrap();
        assert_eq!(targets.len(), 3);
    }
}
