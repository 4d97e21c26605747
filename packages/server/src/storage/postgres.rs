//! PostgreSQL store adapters.
//!
//! Production persistence behind the same ports the in-memory adapters
//! implement. Lifecycle writes are guarded both in Rust (through
//! `JobRecord::advance`) and in SQL (`WHERE` clauses on the prior state), so
//! a concurrent writer can never regress a record. Quota increments are
//! upsert-with-add - the database does the arithmetic, not a read-modify-
//! write round trip.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domains::campaigns::cooldown::{CampaignCooldown, CooldownStore};
use crate::domains::campaigns::model::{Campaign, CampaignStore};
use crate::domains::campaigns::quota::QuotaStore;
use crate::kernel::jobs::{
    truncate_error, ActivityLog, ActivityLogEntry, ActivityOutcome, ErrorCategory, JobRecord,
    JobStatus, JobStore,
};

// ============================================================================
// Jobs
// ============================================================================

pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: Uuid) -> Result<JobRecord> {
        let job = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT id, campaign_id, job_type, status, progress, batch_size, max_items,
                   result, error_message, error_category, created_at, updated_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match job {
            Some(job) => Ok(job),
            None => bail!("job {} not found", id),
        }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(&self, job: &JobRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, campaign_id, job_type, status, progress, batch_size, max_items,
                result, error_message, error_category, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(job.id)
        .bind(job.campaign_id)
        .bind(job.job_type)
        .bind(job.status)
        .bind(job.progress)
        .bind(job.batch_size)
        .bind(job.max_items)
        .bind(&job.result)
        .bind(&job.error_message)
        .bind(job.error_category)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<JobRecord>> {
        let job = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT id, campaign_id, job_type, status, progress, batch_size, max_items,
                   result, error_message, error_category, created_at, updated_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn transition(&self, id: Uuid, status: JobStatus, progress: f64) -> Result<()> {
        let current = self.fetch(id).await?;
        let mut next = current.clone();
        next.advance(status, progress, Utc::now())?;

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, progress = $2, updated_at = NOW()
            WHERE id = $3 AND status = $4 AND progress <= $2
            "#,
        )
        .bind(next.status)
        .bind(next.progress)
        .bind(id)
        .bind(current.status)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated != 1 {
            bail!("job {} was modified concurrently", id);
        }
        Ok(())
    }

    async fn complete(&self, id: Uuid, result: serde_json::Value) -> Result<()> {
        let current = self.fetch(id).await?;
        let mut next = current.clone();
        next.advance(JobStatus::Completed, 1.0, Utc::now())?;

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', progress = 1.0, result = $1, updated_at = NOW()
            WHERE id = $2 AND status = $3
            "#,
        )
        .bind(&result)
        .bind(id)
        .bind(current.status)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated != 1 {
            bail!("job {} was modified concurrently", id);
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, category: ErrorCategory, error: &str) -> Result<()> {
        let current = self.fetch(id).await?;
        let mut next = current.clone();
        next.advance(JobStatus::Failed, current.progress, Utc::now())?;

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', error_message = $1, error_category = $2, updated_at = NOW()
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(truncate_error(error))
        .bind(category)
        .bind(id)
        .bind(current.status)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated != 1 {
            bail!("job {} was modified concurrently", id);
        }
        Ok(())
    }
}

// ============================================================================
// Activity log
// ============================================================================

pub struct PostgresActivityLog {
    pool: PgPool,
}

impl PostgresActivityLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityLog for PostgresActivityLog {
    async fn record_started(&self, entry: ActivityLogEntry) -> Result<Uuid> {
        sqlx::query(
            r#"
            INSERT INTO activity_log (
                id, campaign_id, activity_type, status, total, succeeded, failed,
                error, resistance, details, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(entry.id)
        .bind(entry.campaign_id)
        .bind(&entry.activity_type)
        .bind(entry.status)
        .bind(entry.total)
        .bind(entry.succeeded)
        .bind(entry.failed)
        .bind(&entry.error)
        .bind(entry.resistance)
        .bind(&entry.details)
        .bind(entry.started_at)
        .bind(entry.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(entry.id)
    }

    async fn record_completed(
        &self,
        entry_id: Uuid,
        outcome: ActivityOutcome,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        // The status guard makes the terminal write once-only.
        let updated = sqlx::query(
            r#"
            UPDATE activity_log
            SET status = $1, total = $2, succeeded = $3, failed = $4,
                error = $5, resistance = $6, details = $7, completed_at = $8
            WHERE id = $9 AND status = 'running'
            "#,
        )
        .bind(outcome.status)
        .bind(outcome.total)
        .bind(outcome.succeeded)
        .bind(outcome.failed)
        .bind(&outcome.error)
        .bind(outcome.resistance)
        .bind(&outcome.details)
        .bind(completed_at)
        .bind(entry_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated != 1 {
            bail!("activity entry {} is already terminal", entry_id);
        }
        Ok(())
    }

    async fn resistance_incidents_since(
        &self,
        campaign_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM activity_log
            WHERE campaign_id = $1
              AND resistance IS NOT NULL
              AND completed_at >= $2
            "#,
        )
        .bind(campaign_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

// ============================================================================
// Cooldowns
// ============================================================================

pub struct PostgresCooldownStore {
    pool: PgPool,
}

impl PostgresCooldownStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CooldownStore for PostgresCooldownStore {
    async fn current(&self, campaign_id: Uuid) -> Result<Option<CampaignCooldown>> {
        let cooldown = sqlx::query_as::<_, CampaignCooldown>(
            r#"
            SELECT campaign_id, cooldown_until, resistance, updated_at
            FROM campaign_cooldowns
            WHERE campaign_id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(cooldown)
    }

    async fn put(&self, cooldown: &CampaignCooldown) -> Result<()> {
        // Last write wins, even when the new cooldown is shorter.
        sqlx::query(
            r#"
            INSERT INTO campaign_cooldowns (campaign_id, cooldown_until, resistance, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (campaign_id) DO UPDATE SET
                cooldown_until = EXCLUDED.cooldown_until,
                resistance = EXCLUDED.resistance,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(cooldown.campaign_id)
        .bind(cooldown.cooldown_until)
        .bind(cooldown.resistance)
        .bind(cooldown.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ============================================================================
// Quotas
// ============================================================================

pub struct PostgresQuotaStore {
    pool: PgPool,
}

impl PostgresQuotaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaStore for PostgresQuotaStore {
    async fn count_for_day(&self, campaign_id: Uuid, day: NaiveDate) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT count
            FROM daily_quotas
            WHERE campaign_id = $1 AND day = $2
            "#,
        )
        .bind(campaign_id)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;

        Ok(count.unwrap_or(0))
    }

    async fn add(&self, campaign_id: Uuid, day: NaiveDate, amount: i64) -> Result<i64> {
        // Atomic add in the database; concurrent callers never lose updates.
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO daily_quotas (campaign_id, day, count)
            VALUES ($1, $2, $3)
            ON CONFLICT (campaign_id, day) DO UPDATE SET
                count = daily_quotas.count + EXCLUDED.count
            RETURNING count
            "#,
        )
        .bind(campaign_id)
        .bind(day)
        .bind(amount)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

// ============================================================================
// Campaigns
// ============================================================================

pub struct PostgresCampaignStore {
    pool: PgPool,
}

impl PostgresCampaignStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignStore for PostgresCampaignStore {
    async fn list_active(&self) -> Result<Vec<Campaign>> {
        let campaigns = sqlx::query_as::<_, Campaign>(
            r#"
            SELECT id, name, job_type, timezone, daily_action_limit, batch_size,
                   window_start_hour, window_end_hour, enabled, created_at, updated_at
            FROM campaigns
            WHERE enabled = TRUE
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(campaigns)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Campaign>> {
        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            SELECT id, name, job_type, timezone, daily_action_limit, batch_size,
                   window_start_hour, window_end_hour, enabled, created_at, updated_at
            FROM campaigns
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(campaign)
    }

    async fn pending_targets(
        &self,
        campaign_id: Uuid,
        limit: i64,
    ) -> Result<Vec<serde_json::Value>> {
        let targets = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT target
            FROM campaign_targets
            WHERE campaign_id = $1 AND status = 'pending'
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(campaign_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(targets)
    }
}
