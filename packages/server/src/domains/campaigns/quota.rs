//! Per-campaign daily quota tracking.
//!
//! Quota days are the campaign's site-local calendar date; a new row starts
//! at each local midnight with no carryover. Increments must be atomic at
//! the persistence layer (upsert-with-add, never read-modify-write) because
//! concurrently running jobs may count against the same campaign and day.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::Campaign;

/// The persisted per-campaign, per-day counter row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyQuotaCounter {
    pub campaign_id: Uuid,
    pub day: NaiveDate,
    pub count: i64,
}

/// Port for the persisted quota counters.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Actions counted so far for a campaign on a given day. Zero when no
    /// row exists yet.
    async fn count_for_day(&self, campaign_id: Uuid, day: NaiveDate) -> Result<i64>;

    /// Atomically add `amount` to the day's counter, creating the row on
    /// first use. Returns the new count.
    async fn add(&self, campaign_id: Uuid, day: NaiveDate, amount: i64) -> Result<i64>;
}

/// Actions the campaign may still take today, never negative.
pub async fn remaining(
    store: &dyn QuotaStore,
    campaign: &Campaign,
    now: DateTime<Utc>,
) -> Result<i64> {
    let used = store
        .count_for_day(campaign.id, campaign.local_date(now))
        .await?;
    Ok((campaign.daily_action_limit - used).max(0))
}

/// Count actions that were actually performed (never the requested batch
/// size) against today's quota.
pub async fn record_performed(
    store: &dyn QuotaStore,
    campaign: &Campaign,
    now: DateTime<Utc>,
    amount: i64,
) -> Result<i64> {
    store
        .add(campaign.id, campaign.local_date(now), amount)
        .await
}

/// Clamp a requested batch size to what today's quota still allows.
pub fn clamp_batch(requested: i64, remaining: i64) -> i64 {
    requested.min(remaining).max(0)
}
