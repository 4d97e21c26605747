//! Append-only activity log.
//!
//! Every job phase writes two records: a `Running` entry when work begins and
//! a terminal entry when it settles. Terminal entries are never mutated. The
//! log doubles as the incident history the resistance classifier reads when
//! escalating cooldowns.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domains::campaigns::cooldown::ResistanceKind;

/// Phase status of an activity entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "activity_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Running,
    Success,
    Failed,
}

/// One audit record for a campaign work phase.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityLogEntry {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub activity_type: String,
    pub status: ActivityStatus,
    pub total: i32,
    pub succeeded: i32,
    pub failed: i32,
    pub error: Option<String>,
    /// Resistance kind when this entry records a resistance incident.
    pub resistance: Option<ResistanceKind>,
    /// Structured details: timing, per-phase context.
    pub details: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ActivityLogEntry {
    /// Build the `Running` entry written when a phase starts.
    pub fn running(
        campaign_id: Uuid,
        activity_type: &str,
        total: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            activity_type: activity_type.to_string(),
            status: ActivityStatus::Running,
            total,
            succeeded: 0,
            failed: 0,
            error: None,
            resistance: None,
            details: serde_json::Value::Null,
            started_at: now,
            completed_at: None,
        }
    }
}

/// Terminal outcome written once when a phase settles.
#[derive(Debug, Clone)]
pub struct ActivityOutcome {
    pub status: ActivityStatus,
    pub total: i32,
    pub succeeded: i32,
    pub failed: i32,
    pub error: Option<String>,
    pub resistance: Option<ResistanceKind>,
    pub details: serde_json::Value,
}

impl ActivityOutcome {
    pub fn success(total: i32, succeeded: i32, failed: i32, details: serde_json::Value) -> Self {
        Self {
            status: ActivityStatus::Success,
            total,
            succeeded,
            failed,
            error: None,
            resistance: None,
            details,
        }
    }

    pub fn failed(
        total: i32,
        succeeded: i32,
        failed: i32,
        error: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            status: ActivityStatus::Failed,
            total,
            succeeded,
            failed,
            error: Some(error.into()),
            resistance: None,
            details,
        }
    }

    pub fn with_resistance(mut self, kind: ResistanceKind) -> Self {
        self.resistance = Some(kind);
        self
    }
}

/// Port for the persisted activity log.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    /// Append the `Running` entry for a new phase; returns its id.
    async fn record_started(&self, entry: ActivityLogEntry) -> Result<Uuid>;

    /// Write the terminal state of a phase exactly once.
    ///
    /// Implementations must refuse the write if the entry is already
    /// terminal.
    async fn record_completed(
        &self,
        entry_id: Uuid,
        outcome: ActivityOutcome,
        completed_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Count resistance incidents recorded for a campaign since `since`.
    async fn resistance_incidents_since(
        &self,
        campaign_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_entry_has_no_terminal_fields() {
        let entry =
            ActivityLogEntry::running(Uuid::new_v4(), "send_connection_requests", 25, Utc::now());
        assert_eq!(entry.status, ActivityStatus::Running);
        assert_eq!(entry.succeeded, 0);
        assert_eq!(entry.failed, 0);
        assert!(entry.error.is_none());
        assert!(entry.completed_at.is_none());
    }

    #[test]
    fn outcome_builders_set_status() {
        let ok = ActivityOutcome::success(5, 5, 0, serde_json::json!({"elapsed_ms": 1200}));
        assert_eq!(ok.status, ActivityStatus::Success);
        assert!(ok.error.is_none());

        let bad = ActivityOutcome::failed(5, 1, 3, "rate limit detected", serde_json::Value::Null)
            .with_resistance(ResistanceKind::RateLimit);
        assert_eq!(bad.status, ActivityStatus::Failed);
        assert_eq!(bad.resistance, Some(ResistanceKind::RateLimit));
    }

    #[test]
    fn entry_serializes_round_trip() {
        let entry = ActivityLogEntry::running(Uuid::new_v4(), "scrape", 10, Utc::now());
        let json = serde_json::to_string(&entry).unwrap();
        let back: ActivityLogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.activity_type, "scrape");
        assert_eq!(back.status, ActivityStatus::Running);
    }
}
