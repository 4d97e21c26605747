//! Job model for automated browser work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of an error message persisted on a job record.
///
/// Browser failures can carry whole DOM dumps; everything past this is noise
/// for the operator and ballast for the row.
pub const MAX_STORED_ERROR_LEN: usize = 500;

// ============================================================================
// Enums
// ============================================================================

/// The kind of automated work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Scrape,
    ScrapePremium,
    CheckCookies,
    CheckOpenProfiles,
    CheckConnectionRequests,
    SendConnectionRequests,
    SendConnectionMessages,
    SendOpenProfileMessages,
    ScrapeCompanyData,
}

impl JobType {
    /// Low-risk session/status checks skip the serialized queue and run
    /// concurrently. Everything that touches profiles or sends anything
    /// serializes.
    pub fn bypasses_queue(&self) -> bool {
        matches!(
            self,
            JobType::CheckCookies | JobType::CheckOpenProfiles | JobType::CheckConnectionRequests
        )
    }

    /// Whether actions of this type count against the campaign's daily quota.
    pub fn consumes_quota(&self) -> bool {
        matches!(
            self,
            JobType::SendConnectionRequests
                | JobType::SendConnectionMessages
                | JobType::SendOpenProfileMessages
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Scrape => "scrape",
            JobType::ScrapePremium => "scrape_premium",
            JobType::CheckCookies => "check_cookies",
            JobType::CheckOpenProfiles => "check_open_profiles",
            JobType::CheckConnectionRequests => "check_connection_requests",
            JobType::SendConnectionRequests => "send_connection_requests",
            JobType::SendConnectionMessages => "send_connection_messages",
            JobType::SendOpenProfileMessages => "send_open_profile_messages",
            JobType::ScrapeCompanyData => "scrape_company_data",
        }
    }
}

/// Job lifecycle status.
///
/// `Queued → Started → InProgress* → Completed | Failed`. Terminal states are
/// final; the store refuses any write after them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Started,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    ///
    /// `Queued → Failed` is allowed so validation failures that reject a job
    /// before any work begins still leave a terminal record.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Queued => matches!(next, JobStatus::Started | JobStatus::Failed),
            JobStatus::Started | JobStatus::InProgress => matches!(
                next,
                JobStatus::InProgress | JobStatus::Completed | JobStatus::Failed
            ),
            JobStatus::Completed | JobStatus::Failed => false,
        }
    }
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_error_category", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ValidationFailed,
    CampaignLoadFailed,
    CookieLoadFailed,
    DatabaseFetchFailed,
    DatabaseUpdateFailed,
    AuthenticationFailed,
    SelectorTimeout,
    ConsecutiveFailures,
    Captcha,
    RateLimited,
    SuspiciousActivity,
    Unknown,
}

// ============================================================================
// Errors
// ============================================================================

/// A job-terminal failure carrying its persisted category.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct JobError {
    pub category: ErrorCategory,
    pub message: String,
}

impl JobError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: truncate_error(&message.into()),
        }
    }
}

/// Refused lifecycle writes.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("illegal status transition {from:?} -> {to:?}")]
    IllegalStatus { from: JobStatus, to: JobStatus },

    #[error("progress regressed from {from} to {to}")]
    ProgressRegressed { from: f64, to: f64 },
}

/// Clamp an error message to what we are willing to persist.
pub fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_STORED_ERROR_LEN {
        return message.to_string();
    }
    let mut end = MAX_STORED_ERROR_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

// ============================================================================
// Job record
// ============================================================================

/// The persisted job record external observers poll by id.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobRecord {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Fraction of the batch processed, 0.0–1.0, never decreasing in a run.
    pub progress: f64,
    pub batch_size: i32,
    pub max_items: i32,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a freshly-queued job for a campaign.
    pub fn queued(
        campaign_id: Uuid,
        job_type: JobType,
        batch_size: i32,
        max_items: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            job_type,
            status: JobStatus::Queued,
            progress: 0.0,
            batch_size,
            max_items,
            result: None,
            error_message: None,
            error_category: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a lifecycle step, enforcing status and progress monotonicity.
    ///
    /// Stores call this before persisting so every adapter shares the same
    /// rules.
    pub fn advance(
        &mut self,
        status: JobStatus,
        progress: f64,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(status) {
            return Err(TransitionError::IllegalStatus {
                from: self.status,
                to: status,
            });
        }
        if progress < self.progress {
            return Err(TransitionError::ProgressRegressed {
                from: self.progress,
                to: progress,
            });
        }
        self.status = status;
        self.progress = progress.clamp(0.0, 1.0);
        self.updated_at = now;
        Ok(())
    }
}
