//! Client boundary to the external NLP service.
//!
//! The service is a stateless HTTP collaborator doing text extraction and
//! question generation. Everything behind [`BaseNlpService`] so the pipeline
//! can run against a scripted fake in tests.

mod client;
pub mod normalize;

pub use client::HttpNlpClient;
pub use normalize::{normalize_questions, NormalizeError, QuestionOption, QuizQuestion};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NlpError {
    #[error("nlp request timed out")]
    Timeout,
    #[error("nlp service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("nlp service error: {0}")]
    Service(String),
    #[error("failed to read input file: {0}")]
    Input(#[from] std::io::Error),
    #[error(transparent)]
    Transport(reqwest::Error),
}

impl From<reqwest::Error> for NlpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NlpError::Timeout
        } else {
            NlpError::Transport(err)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

/// Document metadata returned by the extraction endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfMetadata {
    #[serde(default)]
    pub page_count: i64,
    #[serde(default)]
    pub word_count: i64,
    #[serde(default)]
    pub char_count: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
}

/// Result of text extraction.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfExtraction {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default, alias = "extractedText")]
    pub text: String,
    #[serde(default)]
    pub metadata: PdfMetadata,
    #[serde(default)]
    pub error_message: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Result of question generation, questions left un-normalized.
///
/// Raw `serde_json::Value`s because the service answers in more than one
/// shape; the normalizer owns mapping them to canonical records.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    #[serde(default)]
    pub questions: Vec<serde_json::Value>,
    #[serde(default)]
    pub total_generated: i64,
    #[serde(default)]
    pub total_valid: i64,
}

/// NLP service operations consumed by the worker pipeline.
#[async_trait]
pub trait BaseNlpService: Send + Sync {
    /// Extract text from a document via multipart upload.
    async fn extract(&self, file_path: &str, filename: &str) -> Result<PdfExtraction, NlpError>;

    /// Generate questions from extracted text.
    async fn generate(
        &self,
        text: &str,
        count: u32,
        difficulty: Difficulty,
    ) -> Result<Generation, NlpError>;
}
