//! In-process action queue.
//!
//! Most automated work against the target site must never overlap: two
//! browser sessions acting at once is exactly the fingerprint the site's
//! abuse defenses look for. The queue therefore runs one serialized job at a
//! time, in strict submission order, with a settle delay between jobs. A
//! small allow-list of low-risk session checks bypasses serialization and
//! runs concurrently.
//!
//! # Architecture
//!
//! ```text
//! submit(meta, work)
//!     │
//!     ├─► bypass type ──► tokio::spawn (runs immediately, concurrent)
//!     │
//!     └─► serialized ──► mpsc channel ──► single worker task
//!                                             │
//!                                             ├─► run work to settlement
//!                                             ├─► resolve JobHandle
//!                                             └─► settle delay, next job
//! ```
//!
//! A failing job resolves its handle with `Err` but never stops the worker
//! loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::kernel::jobs::JobType;

type WorkFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>;
type WorkFn = Box<dyn FnOnce() -> WorkFuture + Send>;

/// Submission metadata for one job.
#[derive(Debug, Clone)]
pub struct JobMetadata {
    pub id: Uuid,
    pub job_type: JobType,
    pub campaign_id: Uuid,
    /// Force bypass regardless of job type.
    pub force_bypass: bool,
}

impl JobMetadata {
    pub fn new(id: Uuid, job_type: JobType, campaign_id: Uuid) -> Self {
        Self {
            id,
            job_type,
            campaign_id,
            force_bypass: false,
        }
    }

    pub fn bypassed(mut self) -> Self {
        self.force_bypass = true;
        self
    }

    fn bypasses_queue(&self) -> bool {
        self.force_bypass || self.job_type.bypasses_queue()
    }
}

/// Identity of the serialized job currently running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveJob {
    pub id: Uuid,
    pub job_type: JobType,
}

/// Resolves with the job's result once its work function settles.
pub struct JobHandle {
    id: Uuid,
    rx: oneshot::Receiver<Result<serde_json::Value>>,
}

impl JobHandle {
    pub fn job_id(&self) -> Uuid {
        self.id
    }

    /// Await the job's outcome.
    pub async fn join(self) -> Result<serde_json::Value> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("job {} was dropped before settling", self.id)),
        }
    }
}

struct QueuedJob {
    meta: JobMetadata,
    work: WorkFn,
    done: oneshot::Sender<Result<serde_json::Value>>,
}

#[derive(Default)]
struct QueueState {
    pending: AtomicUsize,
    active: Mutex<Option<ActiveJob>>,
}

impl QueueState {
    fn set_active(&self, job: Option<ActiveJob>) {
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = job;
    }
}

/// The queue manager: serializes risky jobs, spawns bypass jobs immediately.
pub struct ActionQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<QueuedJob>>>,
    state: Arc<QueueState>,
    settle_delay: Duration,
}

impl ActionQueue {
    /// Start the queue and its worker task.
    ///
    /// `settle_delay` is the courtesy pause between serialized jobs.
    pub fn new(settle_delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(QueueState::default());

        tokio::spawn(worker_loop(rx, state.clone(), settle_delay));

        Self {
            tx: Mutex::new(Some(tx)),
            state,
            settle_delay,
        }
    }

    /// Submit a job.
    ///
    /// Bypass-classified jobs start immediately and run concurrently with
    /// everything else. Serialized jobs are appended to the FIFO queue and
    /// run one at a time in submission order. Either way the returned handle
    /// resolves with the work function's result; a failing job never affects
    /// any other job.
    pub fn submit<F, Fut>(&self, meta: JobMetadata, work: F) -> JobHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let handle = JobHandle {
            id: meta.id,
            rx: done_rx,
        };

        if meta.bypasses_queue() {
            debug!(job_id = %meta.id, job_type = meta.job_type.as_str(), "running bypass job");
            tokio::spawn(async move {
                let result = work().await;
                if let Err(e) = &result {
                    warn!(job_id = %meta.id, error = %e, "bypass job failed");
                }
                let _ = done_tx.send(result);
            });
            return handle;
        }

        let sender = self
            .tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(sender) = sender else {
            let _ = done_tx.send(Err(anyhow!("action queue is closed")));
            return handle;
        };

        self.state.pending.fetch_add(1, Ordering::SeqCst);
        let work: WorkFn = Box::new(move || {
            let fut: WorkFuture = Box::pin(work());
            fut
        });
        let queued = QueuedJob {
            meta,
            work,
            done: done_tx,
        };
        if let Err(mpsc::error::SendError(job)) = sender.send(queued) {
            // Worker already gone; resolve the handle instead of hanging it.
            self.state.pending.fetch_sub(1, Ordering::SeqCst);
            let _ = job.done.send(Err(anyhow!("action queue is closed")));
        }
        handle
    }

    /// Number of serialized jobs waiting to start.
    pub fn queue_len(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }

    /// The serialized job currently running, if any.
    pub fn active_job(&self) -> Option<ActiveJob> {
        self.state
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Whether a serialized job is currently running.
    pub fn is_busy(&self) -> bool {
        self.active_job().is_some()
    }

    /// The configured settle delay between serialized jobs.
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Stop accepting new serialized jobs. Already-queued jobs drain, then
    /// the worker exits.
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

async fn worker_loop(
    mut rx: mpsc::UnboundedReceiver<QueuedJob>,
    state: Arc<QueueState>,
    settle_delay: Duration,
) {
    info!(settle_delay_ms = settle_delay.as_millis() as u64, "action queue worker started");

    while let Some(job) = rx.recv().await {
        state.pending.fetch_sub(1, Ordering::SeqCst);
        state.set_active(Some(ActiveJob {
            id: job.meta.id,
            job_type: job.meta.job_type,
        }));

        debug!(
            job_id = %job.meta.id,
            job_type = job.meta.job_type.as_str(),
            campaign_id = %job.meta.campaign_id,
            "starting serialized job"
        );

        let result = (job.work)().await;
        match &result {
            Ok(_) => debug!(job_id = %job.meta.id, "serialized job succeeded"),
            Err(e) => warn!(job_id = %job.meta.id, error = %e, "serialized job failed"),
        }

        // Settle the handle before touching the next job so FIFO observers
        // see A resolved before B begins.
        let _ = job.done.send(result);
        state.set_active(None);

        tokio::time::sleep(settle_delay).await;
    }

    info!("action queue worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(job_type: JobType) -> JobMetadata {
        JobMetadata::new(Uuid::new_v4(), job_type, Uuid::new_v4())
    }

    #[tokio::test]
    async fn serialized_job_resolves_with_its_result() {
        let queue = ActionQueue::new(Duration::from_millis(1));
        let handle = queue.submit(meta(JobType::Scrape), || async {
            Ok(serde_json::json!({"scraped": 3}))
        });

        let result = handle.join().await.unwrap();
        assert_eq!(result["scraped"], 3);
    }

    #[tokio::test]
    async fn failed_job_rejects_only_its_own_handle() {
        let queue = ActionQueue::new(Duration::from_millis(1));

        let failing = queue.submit(meta(JobType::Scrape), || async {
            Err(anyhow!("browser crashed"))
        });
        let next = queue.submit(meta(JobType::ScrapeCompanyData), || async {
            Ok(serde_json::Value::Null)
        });

        assert!(failing.join().await.is_err());
        // The worker loop kept going.
        assert!(next.join().await.is_ok());
    }

    #[tokio::test]
    async fn force_bypass_overrides_type_classification() {
        let queue = ActionQueue::new(Duration::from_millis(1));
        let handle = queue.submit(meta(JobType::Scrape).bypassed(), || async {
            Ok(serde_json::Value::Null)
        });
        assert!(handle.join().await.is_ok());
    }

    #[tokio::test]
    async fn closed_queue_rejects_serialized_submissions() {
        let queue = ActionQueue::new(Duration::from_millis(1));
        queue.close();

        let handle = queue.submit(meta(JobType::Scrape), || async {
            Ok(serde_json::Value::Null)
        });
        let err = handle.join().await.unwrap_err();
        assert!(err.to_string().contains("closed"));
    }

    #[tokio::test]
    async fn queue_len_counts_waiting_jobs() {
        let queue = ActionQueue::new(Duration::from_millis(1));

        // Park the worker on a job that waits for a signal.
        let (gate_tx, gate_rx) = oneshot::channel::<()>();
        let first = queue.submit(meta(JobType::Scrape), move || async move {
            let _ = gate_rx.await;
            Ok(serde_json::Value::Null)
        });

        // Give the worker a moment to pick up the first job.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.queue_len(), 0);
        assert!(queue.is_busy());

        let second = queue.submit(meta(JobType::ScrapePremium), || async {
            Ok(serde_json::Value::Null)
        });
        assert_eq!(queue.queue_len(), 1);

        gate_tx.send(()).unwrap();
        first.join().await.unwrap();
        second.join().await.unwrap();
        assert_eq!(queue.queue_len(), 0);
    }
}
