// Trait definitions for the orchestration core's collaborators.
//
// These are INFRASTRUCTURE ports only - no orchestration policy. The browser
// automation behind ActionExecutor and the delivery channel behind Notifier
// live outside this process boundary.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kernel::jobs::JobType;

// =============================================================================
// Action Executor (browser-driven / API-driven unit of work)
// =============================================================================

/// One unit of automated work against the target site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub campaign_id: Uuid,
    pub job_type: JobType,
    /// Opaque target payload (profile URL, message body, ...). The executor
    /// owns its meaning.
    pub target: serde_json::Value,
}

/// What the executor reports back for one action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionReport {
    pub success: bool,
    pub status: Option<String>,
    pub error: Option<String>,
}

impl ActionReport {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            status: None,
            error: Some(error.into()),
        }
    }

    /// The failure text to classify, when the action did not succeed.
    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or("action failed without detail")
    }
}

/// Executes one browser-driven or API-driven action.
///
/// Opaque, possibly slow, possibly failing. A transport-level `Err` and an
/// `Ok` report with `success: false` are both item failures; the report
/// carries the text the resistance classifier inspects.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn perform(&self, action: &ActionSpec) -> Result<ActionReport>;
}

// =============================================================================
// Notifier (operator alerts, fire-and-forget)
// =============================================================================

/// Operator alert channel.
///
/// Callers must never let a notification failure fail the job; use
/// [`crate::kernel::notify::notify_best_effort`].
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<()>;
}
