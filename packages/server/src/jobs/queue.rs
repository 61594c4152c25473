//! Job queue trait and shared result types.
//!
//! Implementations provide durable storage, dedup, retry scheduling, and
//! retention for quiz generation jobs. All cross-process coordination (dedup,
//! attempt counting, claiming) is delegated to atomic operations on the
//! backing store; no in-process locks are required by callers.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use super::job::{Job, JobStatus, Outcome, ProgressSnapshot, RetryDisposition};

/// Result type for enqueue operations that handles dedup.
#[derive(Debug, Clone)]
pub enum EnqueueResult {
    /// A new job was created
    Created(Uuid),
    /// An unterminated job already exists for the quiz (coalesced)
    Coalesced(Uuid),
}

impl EnqueueResult {
    /// Get the job ID regardless of whether it was created or coalesced
    pub fn job_id(&self) -> Uuid {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Coalesced(id) => *id,
        }
    }

    /// Returns true if this was a newly created job
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// Pull-based status view exposed to the routing layer and polling clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    pub attempts_made: i32,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            status: job.status,
            progress: job.snapshot.clone(),
            outcome: job.outcome.clone(),
            attempts_made: job.attempts_made,
        }
    }
}

/// Trait for job queue operations.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job for a quiz.
    ///
    /// If an unterminated job with the same dedup key exists, the submission
    /// coalesces into it and no second execution is created. Fails only on
    /// backing-store unavailability.
    async fn enqueue(&self, job: Job) -> Result<EnqueueResult>;

    /// Current status for a quiz's job, or `None` if no job exists.
    async fn status(&self, quiz_id: &str) -> Result<Option<JobStatusView>>;

    /// Cancel a job that has not begun execution.
    ///
    /// Returns true iff the job was still pending. Never interrupts a
    /// running attempt.
    async fn cancel(&self, quiz_id: &str) -> Result<bool>;

    /// Atomically claim up to `limit` due jobs for execution.
    async fn claim(&self, worker_id: &str, limit: usize) -> Result<Vec<Job>>;

    /// Overwrite the latest progress snapshot for a job.
    async fn record_progress(&self, job_id: Uuid, snapshot: ProgressSnapshot) -> Result<()>;

    /// Mark a job completed with its terminal outcome.
    async fn mark_succeeded(&self, job_id: Uuid, outcome: Outcome) -> Result<()>;

    /// Record an attempt failure.
    ///
    /// Schedules a backoff retry while attempts remain; otherwise the job
    /// becomes terminally failed with the given error as its outcome.
    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<RetryDisposition>;

    /// Evict terminal jobs past the retention window. Returns evicted count.
    async fn prune(&self) -> Result<u64>;
}
