//! Campaign model and store port.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::kernel::jobs::JobType;

/// A campaign: the tenant scope for quotas, cooldowns, and jobs.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    /// The kind of work the scheduler drives for this campaign.
    pub job_type: JobType,
    /// IANA timezone of the targeted region; quota days and dispatch windows
    /// are evaluated in this zone.
    pub timezone: String,
    /// Per-day cap on quota-consuming actions.
    pub daily_action_limit: i64,
    /// Requested batch size per dispatch; clamped to remaining quota.
    pub batch_size: i32,
    /// Dispatch window in site-local hours, `[start, end)`. Equal hours mean
    /// no restriction; `start > end` wraps past midnight.
    pub window_start_hour: i16,
    pub window_end_hour: i16,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Convenience constructor with an unrestricted window.
    pub fn new(
        name: &str,
        job_type: JobType,
        timezone: &str,
        daily_action_limit: i64,
        batch_size: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            job_type,
            timezone: timezone.to_string(),
            daily_action_limit,
            batch_size,
            window_start_hour: 0,
            window_end_hour: 0,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_window(mut self, start_hour: i16, end_hour: i16) -> Self {
        self.window_start_hour = start_hour;
        self.window_end_hour = end_hour;
        self
    }

    /// The campaign's timezone, falling back to UTC on a bad name.
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or_else(|_| {
            warn!(
                campaign_id = %self.id,
                timezone = %self.timezone,
                "unknown campaign timezone, falling back to UTC"
            );
            Tz::UTC
        })
    }

    /// The campaign-local calendar date for quota bookkeeping.
    pub fn local_date(&self, now: DateTime<Utc>) -> chrono::NaiveDate {
        self.tz().from_utc_datetime(&now.naive_utc()).date_naive()
    }

    /// Whether `now` falls inside the campaign's dispatch window.
    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        let (start, end) = (self.window_start_hour, self.window_end_hour);
        if start == end {
            return true;
        }
        let local_hour = self.tz().from_utc_datetime(&now.naive_utc()).hour() as i16;
        if start < end {
            start <= local_hour && local_hour < end
        } else {
            local_hour >= start || local_hour < end
        }
    }
}

/// Port for campaign configuration and pending work targets.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// All enabled campaigns.
    async fn list_active(&self) -> Result<Vec<Campaign>>;

    async fn find(&self, id: Uuid) -> Result<Option<Campaign>>;

    /// Up to `limit` pending action targets for a campaign (profile URLs,
    /// message payloads, ...). Target bookkeeping is the executor domain's
    /// problem; the orchestrator only sizes batches from it.
    async fn pending_targets(&self, campaign_id: Uuid, limit: i64)
        -> Result<Vec<serde_json::Value>>;
}
