//! Quiz generation pipeline.
//!
//! One `run` call executes a single attempt for a claimed job: extract text
//! from the uploaded document, generate questions through the NLP service,
//! normalize them, and persist the result. Each stage transition is reported
//! through the queue (durable, pollable) and the broadcaster (best-effort,
//! push).

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::broadcast::BaseProgressBroadcaster;
use crate::nlp::normalize::{normalize_questions, NormalizeError};
use crate::nlp::{BaseNlpService, Difficulty, NlpError};
use crate::store::BaseQuizStore;

use super::job::{Job, Outcome, ProgressSnapshot, Stage};
use super::queue::JobQueue;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("text extraction failed: {0}")]
    Extraction(NlpError),

    #[error("question generation failed: {0}")]
    Generation(NlpError),

    #[error("extracted text insufficient for generation: {got} chars, need at least {min}")]
    InsufficientText { got: usize, min: usize },

    #[error("nlp service produced no questions")]
    NoQuestions,

    #[error("generated questions failed validation: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] anyhow::Error),
}

pub struct QuizPipeline {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn BaseQuizStore>,
    nlp: Arc<dyn BaseNlpService>,
    broadcaster: Arc<dyn BaseProgressBroadcaster>,
    min_extracted_chars: usize,
    questions_per_quiz: u32,
    difficulty: Difficulty,
}

impl QuizPipeline {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn BaseQuizStore>,
        nlp: Arc<dyn BaseNlpService>,
        broadcaster: Arc<dyn BaseProgressBroadcaster>,
        min_extracted_chars: usize,
        questions_per_quiz: u32,
    ) -> Self {
        Self {
            queue,
            store,
            nlp,
            broadcaster,
            min_extracted_chars,
            questions_per_quiz,
            difficulty: Difficulty::default(),
        }
    }

    /// Execute one attempt for a claimed job.
    ///
    /// Success marks the job and quiz completed. Failure records the attempt
    /// with the queue; the quiz record and viewers only learn of the failure
    /// once no retries remain.
    pub async fn run(&self, job: &Job) {
        let attempt = job.current_attempt();
        info!(
            job_id = %job.id,
            quiz_id = %job.quiz_id,
            attempt,
            max_attempts = job.max_attempts,
            "starting pipeline attempt"
        );

        match self.execute(job).await {
            Ok(outcome) => {
                if let Err(e) = self.queue.mark_succeeded(job.id, outcome.clone()).await {
                    error!(job_id = %job.id, error = %e, "failed to record job success");
                }
                let snapshot = ProgressSnapshot::for_stage(Stage::Completed, "Quiz ready");
                if let Err(e) = self.queue.record_progress(job.id, snapshot.clone()).await {
                    warn!(job_id = %job.id, error = %e, "failed to record final progress");
                }
                self.broadcaster
                    .notify_progress(&job.owner_id, &job.quiz_id, &snapshot)
                    .await;
                self.broadcaster
                    .notify_terminal(&job.owner_id, &job.quiz_id, &outcome)
                    .await;
                info!(job_id = %job.id, quiz_id = %job.quiz_id, "pipeline attempt succeeded");
            }
            Err(e) => self.handle_failure(job, e).await,
        }
    }

    async fn execute(&self, job: &Job) -> Result<Outcome, PipelineError> {
        // Stage 1: extraction
        self.report(job, Stage::Extracting, "Extracting text from document")
            .await;
        self.store.mark_processing(&job.quiz_id).await?;

        let extraction = self
            .nlp
            .extract(&job.file_path, &job.display_name)
            .await
            .map_err(PipelineError::Extraction)?;
        let extracted_chars = extraction.text.chars().count();
        if extracted_chars < self.min_extracted_chars {
            return Err(PipelineError::InsufficientText {
                got: extracted_chars,
                min: self.min_extracted_chars,
            });
        }

        // Stage 2: generation
        self.report(job, Stage::Generating, "Generating questions")
            .await;
        let generation = self
            .nlp
            .generate(&extraction.text, self.questions_per_quiz, self.difficulty)
            .await
            .map_err(PipelineError::Generation)?;
        if generation.questions.is_empty() {
            return Err(PipelineError::NoQuestions);
        }

        // Stage 3: validation
        self.report(job, Stage::Validating, "Validating questions")
            .await;
        let questions = normalize_questions(&generation.questions)?;

        // Stage 4: persistence
        self.report(job, Stage::Saving, "Saving quiz").await;
        self.store.save_questions(&job.quiz_id, &questions).await?;
        self.store
            .complete(
                &job.quiz_id,
                extraction.metadata.page_count,
                extracted_chars as i64,
            )
            .await?;

        Ok(Outcome::success(
            questions.len() as i64,
            extraction.metadata.page_count,
        ))
    }

    async fn handle_failure(&self, job: &Job, err: PipelineError) {
        let message = err.to_string();
        warn!(
            job_id = %job.id,
            quiz_id = %job.quiz_id,
            attempt = job.current_attempt(),
            error = %message,
            "pipeline attempt failed"
        );

        let disposition = match self.queue.mark_failed(job.id, &message).await {
            Ok(d) => d,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to record job failure");
                return;
            }
        };

        let snapshot = ProgressSnapshot::for_stage(Stage::Failed, message.clone());
        if let Err(e) = self.queue.record_progress(job.id, snapshot.clone()).await {
            warn!(job_id = %job.id, error = %e, "failed to record failure progress");
        }
        self.broadcaster
            .notify_progress(&job.owner_id, &job.quiz_id, &snapshot)
            .await;

        if disposition.will_retry {
            info!(
                job_id = %job.id,
                attempts_made = disposition.attempts_made,
                max_attempts = job.max_attempts,
                "job scheduled for retry"
            );
            return;
        }

        // Out of attempts: make the failure durable and tell the viewers.
        if let Err(e) = self.store.fail(&job.quiz_id, &message).await {
            error!(quiz_id = %job.quiz_id, error = %e, "failed to mark quiz failed");
        }
        self.broadcaster
            .notify_terminal(&job.owner_id, &job.quiz_id, &Outcome::failure(&message))
            .await;
        info!(
            job_id = %job.id,
            quiz_id = %job.quiz_id,
            attempts_made = disposition.attempts_made,
            "job failed terminally"
        );
    }

    async fn report(&self, job: &Job, stage: Stage, message: &str) {
        let snapshot = ProgressSnapshot::for_stage(stage, message);
        if let Err(e) = self.queue.record_progress(job.id, snapshot.clone()).await {
            warn!(job_id = %job.id, stage = %stage, error = %e, "failed to record progress");
        }
        self.broadcaster
            .notify_progress(&job.owner_id, &job.quiz_id, &snapshot)
            .await;
    }
}
