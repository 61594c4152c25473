//! In-memory job queue.
//!
//! Single-process implementation of [`JobQueue`] used by tests and local
//! development. One record per quiz: a terminal job is replaced on the next
//! submission, an unterminated one coalesces.

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::job::{
    Job, JobStatus, Outcome, ProgressSnapshot, RetentionPolicy, RetryDisposition, RetryPolicy,
    Stage,
};
use super::queue::{EnqueueResult, JobQueue, JobStatusView};

pub struct InMemoryJobQueue {
    jobs: Mutex<HashMap<String, Job>>,
    retry: RetryPolicy,
    retention: RetentionPolicy,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::with_policies(RetryPolicy::default(), RetentionPolicy::default())
    }

    pub fn with_policies(retry: RetryPolicy, retention: RetentionPolicy) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            retry,
            retention,
        }
    }

    /// Snapshot of a quiz's job record (test observability).
    pub async fn get(&self, quiz_id: &str) -> Option<Job> {
        self.jobs.lock().await.get(quiz_id).cloned()
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<EnqueueResult> {
        let mut jobs = self.jobs.lock().await;
        if let Some(existing) = jobs.get(&job.quiz_id) {
            if !existing.is_terminal() {
                return Ok(EnqueueResult::Coalesced(existing.id));
            }
        }
        let id = job.id;
        jobs.insert(job.quiz_id.clone(), job);
        Ok(EnqueueResult::Created(id))
    }

    async fn status(&self, quiz_id: &str) -> Result<Option<JobStatusView>> {
        let jobs = self.jobs.lock().await;
        Ok(jobs.get(quiz_id).map(JobStatusView::from))
    }

    async fn cancel(&self, quiz_id: &str) -> Result<bool> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(quiz_id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Cancelled;
                job.finished_at = Some(Utc::now());
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim(&self, _worker_id: &str, limit: usize) -> Result<Vec<Job>> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;

        let mut due: Vec<&mut Job> = jobs
            .values_mut()
            .filter(|j| j.is_ready(now))
            .collect();
        due.sort_by_key(|j| j.created_at);

        let mut claimed = Vec::new();
        for job in due.into_iter().take(limit) {
            job.status = JobStatus::Active;
            job.updated_at = now;
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn record_progress(&self, job_id: Uuid, snapshot: ProgressSnapshot) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.values_mut().find(|j| j.id == job_id) {
            job.stage = Some(snapshot.stage);
            job.snapshot = Some(snapshot);
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_succeeded(&self, job_id: Uuid, outcome: Outcome) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.values_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Completed;
            job.stage = Some(Stage::Completed);
            job.attempts_made += 1;
            job.outcome = Some(outcome);
            job.finished_at = Some(Utc::now());
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<RetryDisposition> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.values_mut().find(|j| j.id == job_id) else {
            bail!("job {job_id} not found");
        };

        job.attempts_made += 1;
        job.last_error = Some(error.to_string());
        job.updated_at = Utc::now();

        let will_retry = job.attempts_made < job.max_attempts;
        if will_retry {
            job.status = JobStatus::Pending;
            job.next_run_at = Some(Utc::now() + self.retry.delay_for(job.attempts_made));
        } else {
            job.status = JobStatus::Failed;
            job.stage = Some(Stage::Failed);
            job.outcome = Some(Outcome::failure(error));
            job.finished_at = Some(Utc::now());
        }

        Ok(RetryDisposition {
            will_retry,
            attempts_made: job.attempts_made,
        })
    }

    async fn prune(&self) -> Result<u64> {
        let cutoff = Utc::now() - self.retention.max_age;
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();

        // Age bound
        jobs.retain(|_, j| !j.is_terminal() || j.finished_at.map_or(true, |at| at > cutoff));

        // Count bound: evict the oldest terminal jobs beyond the cap
        let mut terminal: Vec<(String, chrono::DateTime<Utc>)> = jobs
            .values()
            .filter(|j| j.is_terminal())
            .map(|j| (j.quiz_id.clone(), j.finished_at.unwrap_or(j.updated_at)))
            .collect();
        if terminal.len() > self.retention.max_terminal {
            terminal.sort_by_key(|(_, at)| *at);
            let excess = terminal.len() - self.retention.max_terminal;
            for (quiz_id, _) in terminal.into_iter().take(excess) {
                jobs.remove(&quiz_id);
            }
        }

        Ok((before - jobs.len()) as u64)
    }
}
