//! Job store port.
//!
//! Every lifecycle transition is persisted before the caller's next unit of
//! work, so an external observer polling a job id always sees a consistent,
//! monotonic view. Adapters enforce the transition rules via
//! [`JobRecord::advance`](super::JobRecord::advance) — the rules live in the
//! model, not in any one backend.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use super::job::{ErrorCategory, JobRecord, JobStatus};

/// Port for persisted job lifecycle state.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a freshly-queued job record.
    async fn create(&self, job: &JobRecord) -> Result<()>;

    /// Fetch a job by id.
    async fn find(&self, id: Uuid) -> Result<Option<JobRecord>>;

    /// Persist a non-terminal lifecycle step (`Started` / `InProgress`).
    ///
    /// Fails if the step would regress status or progress.
    async fn transition(&self, id: Uuid, status: JobStatus, progress: f64) -> Result<()>;

    /// Terminal success: status `Completed`, progress 1.0, and the result
    /// payload written atomically.
    async fn complete(&self, id: Uuid, result: serde_json::Value) -> Result<()>;

    /// Terminal failure: status `Failed` with category and truncated error
    /// text written atomically. Progress keeps its last persisted value.
    async fn fail(&self, id: Uuid, category: ErrorCategory, error: &str) -> Result<()>;
}
