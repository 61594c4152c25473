use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub nlp_service_url: String,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    /// Maximum simultaneous pipeline executions per process
    pub worker_concurrency: usize,
    /// Maximum job starts per rolling minute (NLP service throttle)
    pub job_starts_per_minute: usize,
    /// Minimum extracted text length required before generation
    pub min_extracted_chars: usize,
    /// Number of questions requested per document
    pub questions_per_quiz: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            nlp_service_url: env::var("NLP_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "quiz-api".to_string()),
            worker_concurrency: env::var("WORKER_CONCURRENCY")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("WORKER_CONCURRENCY must be a valid number")?,
            job_starts_per_minute: env::var("JOB_STARTS_PER_MINUTE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("JOB_STARTS_PER_MINUTE must be a valid number")?,
            min_extracted_chars: env::var("MIN_EXTRACTED_CHARS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .context("MIN_EXTRACTED_CHARS must be a valid number")?,
            questions_per_quiz: env::var("QUESTIONS_PER_QUIZ")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("QUESTIONS_PER_QUIZ must be a valid number")?,
        })
    }
}
