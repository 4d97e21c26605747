//! Resistance classification and campaign cooldowns.
//!
//! When the target site pushes back - a CAPTCHA, rate limiting, a forced
//! re-login, a suspicious-activity flag - the campaign goes quiet for a
//! while instead of hammering on. Repeat incidents within 24 hours escalate
//! the cooldown, capped at 4x the base so a bad day never locks a campaign
//! out forever.
//!
//! The persisted cooldown row is the single source of truth: the scheduler
//! reads it through the store on every tick, and `apply_cooldown` overwrites
//! it last-write-wins.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::kernel::deps::AutomationDeps;
use crate::kernel::jobs::ErrorCategory;
use crate::kernel::notify::notify_best_effort;

/// Escalation cap: incidents beyond the 4th in 24h no longer lengthen the
/// cooldown.
const MAX_ESCALATION_FACTOR: i64 = 4;

/// A detected defensive response from the target site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "resistance_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResistanceKind {
    Captcha,
    RateLimit,
    Authentication,
    SuspiciousActivity,
}

impl ResistanceKind {
    /// Pattern-match an error text against the known resistance signatures.
    /// Returns `None` when the failure is not a resistance event.
    pub fn classify(error_text: &str) -> Option<Self> {
        let text = error_text.to_lowercase();
        if text.contains("captcha") || text.contains("security verification") {
            Some(ResistanceKind::Captcha)
        } else if text.contains("rate limit")
            || text.contains("too many requests")
            || text.contains("429")
        {
            Some(ResistanceKind::RateLimit)
        } else if text.contains("authentication")
            || text.contains("session expired")
            || text.contains("logged out")
            || text.contains("sign in")
        {
            Some(ResistanceKind::Authentication)
        } else if text.contains("suspicious") || text.contains("unusual activity") {
            Some(ResistanceKind::SuspiciousActivity)
        } else {
            None
        }
    }

    /// Cooldown applied on the first incident in 24 hours.
    pub fn base_cooldown(&self) -> Duration {
        match self {
            ResistanceKind::Captcha => Duration::hours(3),
            ResistanceKind::RateLimit => Duration::hours(4),
            ResistanceKind::Authentication => Duration::hours(1),
            ResistanceKind::SuspiciousActivity => Duration::hours(6),
        }
    }

    /// The job error category a resistance-aborted job is failed with.
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            ResistanceKind::Captcha => ErrorCategory::Captcha,
            ResistanceKind::RateLimit => ErrorCategory::RateLimited,
            ResistanceKind::Authentication => ErrorCategory::AuthenticationFailed,
            ResistanceKind::SuspiciousActivity => ErrorCategory::SuspiciousActivity,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResistanceKind::Captcha => "captcha",
            ResistanceKind::RateLimit => "rate_limit",
            ResistanceKind::Authentication => "authentication",
            ResistanceKind::SuspiciousActivity => "suspicious_activity",
        }
    }
}

/// The persisted cooldown row for a campaign. Overwritten, never deleted;
/// the newest cooldown always wins even if it is shorter.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CampaignCooldown {
    pub campaign_id: Uuid,
    pub cooldown_until: DateTime<Utc>,
    pub resistance: ResistanceKind,
    pub updated_at: DateTime<Utc>,
}

impl CampaignCooldown {
    pub fn active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.cooldown_until
    }
}

/// Port for the persisted cooldown state.
#[async_trait]
pub trait CooldownStore: Send + Sync {
    /// The current cooldown row for a campaign, if one was ever set.
    async fn current(&self, campaign_id: Uuid) -> Result<Option<CampaignCooldown>>;

    /// Persist a cooldown, overwriting any prior row (last write wins).
    async fn put(&self, cooldown: &CampaignCooldown) -> Result<()>;
}

/// Compute the cooldown for a fresh incident, escalated by the number of
/// resistance incidents this campaign logged in the trailing 24 hours. The
/// count includes the incident being classified: the first incident gets the
/// base duration, the second 2x, capped at 4x.
pub async fn cooldown_duration(
    deps: &AutomationDeps,
    campaign_id: Uuid,
    kind: ResistanceKind,
) -> Result<Duration> {
    let since = deps.clock.now() - Duration::hours(24);
    let prior = deps
        .activity
        .resistance_incidents_since(campaign_id, since)
        .await?;
    let factor = (prior + 1).min(MAX_ESCALATION_FACTOR);
    Ok(kind.base_cooldown() * factor as i32)
}

/// Classify-and-persist for a detected incident: computes the escalated
/// duration, overwrites the campaign's cooldown row, and alerts the
/// operator. Returns the persisted cooldown.
pub async fn apply_cooldown(
    deps: &AutomationDeps,
    campaign_id: Uuid,
    kind: ResistanceKind,
) -> Result<CampaignCooldown> {
    let duration = cooldown_duration(deps, campaign_id, kind).await?;
    let now = deps.clock.now();
    let cooldown = CampaignCooldown {
        campaign_id,
        cooldown_until: now + duration,
        resistance: kind,
        updated_at: now,
    };
    deps.cooldowns.put(&cooldown).await?;

    warn!(
        campaign_id = %campaign_id,
        resistance = kind.as_str(),
        cooldown_until = %cooldown.cooldown_until,
        "resistance detected, campaign cooling down"
    );
    notify_best_effort(
        deps.notifier.as_ref(),
        &format!(
            "Campaign {} hit {} - cooling down until {}",
            campaign_id,
            kind.as_str(),
            cooldown.cooldown_until.format("%Y-%m-%d %H:%M UTC")
        ),
    )
    .await;

    Ok(cooldown)
}
