//! PostgreSQL-backed job queue.
//!
//! The backing store is the single point of cross-process coordination:
//! dedup rides on a partial unique index over the dedup key, claiming uses
//! `FOR UPDATE SKIP LOCKED`, and attempt counting happens inside the
//! `mark_failed` transaction.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::job::{
    Job, JobStatus, Outcome, ProgressSnapshot, RetentionPolicy, RetryDisposition, RetryPolicy,
    Stage,
};
use super::queue::{EnqueueResult, JobQueue, JobStatusView};

const JOB_COLUMNS: &str = "id, quiz_id, owner_id, dedup_key, file_path, display_name, \
     status, stage, attempts_made, max_attempts, next_run_at, last_error, \
     snapshot, outcome, finished_at, created_at, updated_at";

pub struct PostgresJobQueue {
    pool: PgPool,
    retry: RetryPolicy,
    retention: RetentionPolicy,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self::with_policies(pool, RetryPolicy::default(), RetentionPolicy::default())
    }

    pub fn with_policies(pool: PgPool, retry: RetryPolicy, retention: RetentionPolicy) -> Self {
        Self {
            pool,
            retry,
            retention,
        }
    }
}

/// Raw row with primitive column types; converted to [`Job`] after fetch.
#[derive(FromRow)]
struct JobRow {
    id: Uuid,
    quiz_id: String,
    owner_id: String,
    dedup_key: String,
    file_path: String,
    display_name: String,
    status: String,
    stage: Option<String>,
    attempts_made: i32,
    max_attempts: i32,
    next_run_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    snapshot: Option<serde_json::Value>,
    outcome: Option<serde_json::Value>,
    finished_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| anyhow!("unknown job status: {}", self.status))?;
        let stage = match self.stage {
            Some(s) => Some(Stage::parse(&s).ok_or_else(|| anyhow!("unknown stage: {s}"))?),
            None => None,
        };
        let snapshot: Option<ProgressSnapshot> = self
            .snapshot
            .map(serde_json::from_value)
            .transpose()
            .context("invalid progress snapshot")?;
        let outcome: Option<Outcome> = self
            .outcome
            .map(serde_json::from_value)
            .transpose()
            .context("invalid outcome")?;

        Ok(Job {
            id: self.id,
            quiz_id: self.quiz_id,
            owner_id: self.owner_id,
            dedup_key: self.dedup_key,
            file_path: self.file_path,
            display_name: self.display_name,
            status,
            stage,
            attempts_made: self.attempts_made,
            max_attempts: self.max_attempts,
            next_run_at: self.next_run_at,
            last_error: self.last_error,
            snapshot,
            outcome,
            finished_at: self.finished_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(&self, job: Job) -> Result<EnqueueResult> {
        // Select-then-insert, looping on the race window: a concurrent
        // duplicate can appear between the select and the insert (the
        // partial unique index makes the insert lose) and can also turn
        // terminal again before the re-select sees it, in which case the
        // insert is simply retried.
        loop {
            let existing = sqlx::query_scalar::<_, Uuid>(
                r#"
                SELECT id FROM quiz_jobs
                WHERE dedup_key = $1 AND status IN ('pending', 'active')
                LIMIT 1
                "#,
            )
            .bind(&job.dedup_key)
            .fetch_optional(&self.pool)
            .await
            .context("job queue store unavailable")?;

            if let Some(id) = existing {
                return Ok(EnqueueResult::Coalesced(id));
            }

            let inserted = sqlx::query_scalar::<_, Uuid>(
                r#"
                INSERT INTO quiz_jobs (
                    id, quiz_id, owner_id, dedup_key, file_path, display_name,
                    status, attempts_made, max_attempts, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0, $7, NOW(), NOW())
                ON CONFLICT (dedup_key) WHERE status IN ('pending', 'active') DO NOTHING
                RETURNING id
                "#,
            )
            .bind(job.id)
            .bind(&job.quiz_id)
            .bind(&job.owner_id)
            .bind(&job.dedup_key)
            .bind(&job.file_path)
            .bind(&job.display_name)
            .bind(job.max_attempts)
            .fetch_optional(&self.pool)
            .await
            .context("job queue store unavailable")?;

            if let Some(id) = inserted {
                return Ok(EnqueueResult::Created(id));
            }
        }
    }

    async fn status(&self, quiz_id: &str) -> Result<Option<JobStatusView>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM quiz_jobs
            WHERE quiz_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(quiz_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_job().map(|j| JobStatusView::from(&j)))
            .transpose()
    }

    async fn cancel(&self, quiz_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE quiz_jobs
            SET status = 'cancelled',
                finished_at = NOW(),
                updated_at = NOW()
            WHERE quiz_id = $1 AND status = 'pending'
            "#,
        )
        .bind(quiz_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn claim(&self, _worker_id: &str, limit: usize) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            WITH next_jobs AS (
                SELECT id FROM quiz_jobs
                WHERE status = 'pending'
                  AND (next_run_at IS NULL OR next_run_at <= NOW())
                ORDER BY COALESCE(next_run_at, created_at)
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE quiz_jobs
            SET status = 'active', updated_at = NOW()
            WHERE id IN (SELECT id FROM next_jobs)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn record_progress(&self, job_id: Uuid, snapshot: ProgressSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE quiz_jobs
            SET snapshot = $1, stage = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(serde_json::to_value(&snapshot)?)
        .bind(snapshot.stage.as_str())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_succeeded(&self, job_id: Uuid, outcome: Outcome) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE quiz_jobs
            SET status = 'completed',
                stage = 'completed',
                attempts_made = attempts_made + 1,
                outcome = $1,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(serde_json::to_value(&outcome)?)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<RetryDisposition> {
        let mut tx = self.pool.begin().await?;

        let (attempts_made, max_attempts) = sqlx::query_as::<_, (i32, i32)>(
            "SELECT attempts_made, max_attempts FROM quiz_jobs WHERE id = $1 FOR UPDATE",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| anyhow!("job {job_id} not found"))?;

        let attempts_made = attempts_made + 1;
        let will_retry = attempts_made < max_attempts;

        if will_retry {
            let retry_at = Utc::now() + self.retry.delay_for(attempts_made);
            sqlx::query(
                r#"
                UPDATE quiz_jobs
                SET status = 'pending',
                    attempts_made = $1,
                    next_run_at = $2,
                    last_error = $3,
                    updated_at = NOW()
                WHERE id = $4
                "#,
            )
            .bind(attempts_made)
            .bind(retry_at)
            .bind(error)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE quiz_jobs
                SET status = 'failed',
                    stage = 'failed',
                    attempts_made = $1,
                    last_error = $2,
                    outcome = $3,
                    finished_at = NOW(),
                    updated_at = NOW()
                WHERE id = $4
                "#,
            )
            .bind(attempts_made)
            .bind(error)
            .bind(serde_json::to_value(Outcome::failure(error))?)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(RetryDisposition {
            will_retry,
            attempts_made,
        })
    }

    async fn prune(&self) -> Result<u64> {
        let cutoff = Utc::now() - self.retention.max_age;

        let aged = sqlx::query(
            r#"
            DELETE FROM quiz_jobs
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND finished_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let excess = sqlx::query(
            r#"
            DELETE FROM quiz_jobs
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND id NOT IN (
                  SELECT id FROM quiz_jobs
                  WHERE status IN ('completed', 'failed', 'cancelled')
                  ORDER BY finished_at DESC
                  LIMIT $1
              )
            "#,
        )
        .bind(self.retention.max_terminal as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(aged + excess)
    }
}
