//! Durable quiz state.
//!
//! The pipeline writes the owning quiz's processing status and the generated
//! questions here. Terminal statuses are write-once: `complete`/`fail` only
//! land while the quiz is not yet terminal, so a stale attempt can never
//! clobber a finished quiz.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::nlp::QuizQuestion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuizStatus {
    Processing,
    Completed,
    Failed,
}

impl QuizStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QuizStatus::Completed | QuizStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuizStatus::Processing => "processing",
            QuizStatus::Completed => "completed",
            QuizStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizRecord {
    pub quiz_id: String,
    pub status: QuizStatus,
    pub question_count: i64,
    pub page_count: i64,
    pub extracted_chars: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Durable quiz state operations consumed by the worker pipeline.
#[async_trait]
pub trait BaseQuizStore: Send + Sync {
    /// Mark the quiz as processing. Idempotent - safe to repeat across
    /// attempts, and a no-op once the quiz is terminal.
    async fn mark_processing(&self, quiz_id: &str) -> Result<()>;

    /// Persist all normalized questions in one batch write, replacing any
    /// questions from an earlier attempt.
    async fn save_questions(&self, quiz_id: &str, questions: &[QuizQuestion]) -> Result<()>;

    /// Terminal success with derived metadata.
    async fn complete(&self, quiz_id: &str, page_count: i64, extracted_chars: i64) -> Result<()>;

    /// Terminal failure with a human-readable message.
    async fn fail(&self, quiz_id: &str, message: &str) -> Result<()>;

    async fn get(&self, quiz_id: &str) -> Result<Option<QuizRecord>>;
}

// ============================================================================
// In-memory implementation (tests, local dev)
// ============================================================================

#[derive(Default)]
struct MemoryQuiz {
    status: QuizStatus,
    questions: Vec<QuizQuestion>,
    page_count: i64,
    extracted_chars: i64,
    error_message: Option<String>,
    updated_at: Option<DateTime<Utc>>,
}

impl Default for QuizStatus {
    fn default() -> Self {
        QuizStatus::Processing
    }
}

#[derive(Default)]
pub struct InMemoryQuizStore {
    quizzes: Mutex<HashMap<String, MemoryQuiz>>,
}

impl InMemoryQuizStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Saved questions for a quiz (test observability).
    pub async fn questions(&self, quiz_id: &str) -> Vec<QuizQuestion> {
        let quizzes = self.quizzes.lock().await;
        quizzes
            .get(quiz_id)
            .map(|q| q.questions.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BaseQuizStore for InMemoryQuizStore {
    async fn mark_processing(&self, quiz_id: &str) -> Result<()> {
        let mut quizzes = self.quizzes.lock().await;
        let quiz = quizzes.entry(quiz_id.to_string()).or_default();
        if !quiz.status.is_terminal() {
            quiz.status = QuizStatus::Processing;
            quiz.updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn save_questions(&self, quiz_id: &str, questions: &[QuizQuestion]) -> Result<()> {
        let mut quizzes = self.quizzes.lock().await;
        let quiz = quizzes.entry(quiz_id.to_string()).or_default();
        quiz.questions = questions.to_vec();
        quiz.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn complete(&self, quiz_id: &str, page_count: i64, extracted_chars: i64) -> Result<()> {
        let mut quizzes = self.quizzes.lock().await;
        let quiz = quizzes.entry(quiz_id.to_string()).or_default();
        if !quiz.status.is_terminal() {
            quiz.status = QuizStatus::Completed;
            quiz.page_count = page_count;
            quiz.extracted_chars = extracted_chars;
            quiz.error_message = None;
            quiz.updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn fail(&self, quiz_id: &str, message: &str) -> Result<()> {
        let mut quizzes = self.quizzes.lock().await;
        let quiz = quizzes.entry(quiz_id.to_string()).or_default();
        if !quiz.status.is_terminal() {
            quiz.status = QuizStatus::Failed;
            quiz.error_message = Some(message.to_string());
            quiz.updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get(&self, quiz_id: &str) -> Result<Option<QuizRecord>> {
        let quizzes = self.quizzes.lock().await;
        Ok(quizzes.get(quiz_id).map(|q| QuizRecord {
            quiz_id: quiz_id.to_string(),
            status: q.status,
            question_count: q.questions.len() as i64,
            page_count: q.page_count,
            extracted_chars: q.extracted_chars,
            error_message: q.error_message.clone(),
            updated_at: q.updated_at.unwrap_or_else(Utc::now),
        }))
    }
}

// ============================================================================
// PostgreSQL implementation
// ============================================================================

pub struct PostgresQuizStore {
    pool: PgPool,
}

impl PostgresQuizStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseQuizStore for PostgresQuizStore {
    async fn mark_processing(&self, quiz_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO quizzes (quiz_id, status, updated_at)
            VALUES ($1, 'processing', NOW())
            ON CONFLICT (quiz_id) DO UPDATE
            SET status = 'processing', updated_at = NOW()
            WHERE quizzes.status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(quiz_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_questions(&self, quiz_id: &str, questions: &[QuizQuestion]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM quiz_questions WHERE quiz_id = $1")
            .bind(quiz_id)
            .execute(&mut *tx)
            .await?;

        if questions.is_empty() {
            tx.commit().await?;
            return Ok(());
        }

        let mut builder = sqlx::QueryBuilder::new(
            "INSERT INTO quiz_questions \
             (id, quiz_id, question_text, options, correct_answer, explanation, \
              difficulty, quality_score, source_page) ",
        );
        builder.push_values(questions, |mut row, question| {
            row.push_bind(Uuid::new_v4())
                .push_bind(quiz_id)
                .push_bind(&question.question_text)
                .push_bind(serde_json::to_value(&question.options).unwrap_or_default())
                .push_bind(&question.correct_answer)
                .push_bind(&question.explanation)
                .push_bind(question.difficulty.as_str())
                .push_bind(question.quality_score)
                .push_bind(question.source_page);
        });
        builder.build().execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn complete(&self, quiz_id: &str, page_count: i64, extracted_chars: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE quizzes
            SET status = 'completed',
                page_count = $2,
                extracted_chars = $3,
                question_count = (SELECT COUNT(*) FROM quiz_questions WHERE quiz_id = $1),
                error_message = NULL,
                updated_at = NOW()
            WHERE quiz_id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(quiz_id)
        .bind(page_count)
        .bind(extracted_chars)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail(&self, quiz_id: &str, message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE quizzes
            SET status = 'failed',
                error_message = $2,
                updated_at = NOW()
            WHERE quiz_id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(quiz_id)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, quiz_id: &str) -> Result<Option<QuizRecord>> {
        let row = sqlx::query_as::<
            _,
            (
                String,
                String,
                i64,
                i64,
                i64,
                Option<String>,
                DateTime<Utc>,
            ),
        >(
            r#"
            SELECT quiz_id, status, question_count, page_count, extracted_chars,
                   error_message, updated_at
            FROM quizzes
            WHERE quiz_id = $1
            "#,
        )
        .bind(quiz_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(quiz_id, status, question_count, page_count, extracted_chars, error, updated_at)| {
                let status = match status.as_str() {
                    "completed" => QuizStatus::Completed,
                    "failed" => QuizStatus::Failed,
                    _ => QuizStatus::Processing,
                };
                QuizRecord {
                    quiz_id,
                    status,
                    question_count,
                    page_count,
                    extracted_chars,
                    error_message: error,
                    updated_at,
                }
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mark_processing_is_idempotent() {
        let store = InMemoryQuizStore::new();
        store.mark_processing("pdf-1").await.unwrap();
        store.mark_processing("pdf-1").await.unwrap();

        let record = store.get("pdf-1").await.unwrap().unwrap();
        assert_eq!(record.status, QuizStatus::Processing);
    }

    #[tokio::test]
    async fn terminal_status_is_never_overwritten() {
        let store = InMemoryQuizStore::new();
        store.mark_processing("pdf-1").await.unwrap();
        store.complete("pdf-1", 10, 4000).await.unwrap();

        store.fail("pdf-1", "late failure").await.unwrap();
        store.mark_processing("pdf-1").await.unwrap();

        let record = store.get("pdf-1").await.unwrap().unwrap();
        assert_eq!(record.status, QuizStatus::Completed);
        assert!(record.error_message.is_none());
    }

    #[tokio::test]
    async fn failed_quiz_keeps_its_message() {
        let store = InMemoryQuizStore::new();
        store.mark_processing("pdf-1").await.unwrap();
        store.fail("pdf-1", "extraction timed out").await.unwrap();

        let record = store.get("pdf-1").await.unwrap().unwrap();
        assert_eq!(record.status, QuizStatus::Failed);
        assert_eq!(record.error_message.unwrap(), "extraction timed out");
    }
}
