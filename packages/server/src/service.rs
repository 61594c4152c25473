//! Submission-facing facade over the job queue.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::jobs::{Job, JobQueue, JobStatusView};

/// A request to turn an uploaded document into a quiz.
#[derive(Debug, Clone)]
pub struct QuizSubmission {
    pub quiz_id: String,
    pub owner_id: String,
    pub file_path: String,
    pub display_name: String,
}

/// What the caller gets back from a submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    pub job_id: Uuid,
    /// True when the submission joined an outstanding job instead of
    /// starting a new one.
    pub coalesced: bool,
}

pub struct ProcessingService {
    queue: Arc<dyn JobQueue>,
}

impl ProcessingService {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Submit a document for quiz generation.
    ///
    /// Duplicate submissions for the same quiz coalesce into the outstanding
    /// job; the returned handle says which happened.
    pub async fn submit(&self, submission: QuizSubmission) -> Result<JobHandle> {
        let job = Job::for_submission(
            &submission.quiz_id,
            &submission.owner_id,
            &submission.file_path,
            &submission.display_name,
        );
        let result = self.queue.enqueue(job).await?;
        let handle = JobHandle {
            job_id: result.job_id(),
            coalesced: !result.is_created(),
        };
        info!(
            quiz_id = %submission.quiz_id,
            job_id = %handle.job_id,
            coalesced = handle.coalesced,
            "quiz submission accepted"
        );
        Ok(handle)
    }

    /// Poll the current status of a quiz's job.
    pub async fn status(&self, quiz_id: &str) -> Result<Option<JobStatusView>> {
        self.queue.status(quiz_id).await
    }

    /// Cancel a job that has not started executing.
    pub async fn cancel(&self, quiz_id: &str) -> Result<bool> {
        let cancelled = self.queue.cancel(quiz_id).await?;
        info!(quiz_id = %quiz_id, cancelled, "cancel requested");
        Ok(cancelled)
    }
}
