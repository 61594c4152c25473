//! Job model for quiz generation work.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// Default number of pipeline attempts per job.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Deterministic job identity derived from the quiz id.
///
/// Two submissions for the same quiz produce the same key, so an outstanding
/// job coalesces instead of executing twice.
pub fn dedup_key(quiz_id: &str) -> String {
    format!("quiz:{quiz_id}")
}

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "active" => Some(JobStatus::Active),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

/// Pipeline stage, in fixed order per attempt.
///
/// `Failed` is an absorbing state reachable from any stage. A fresh attempt
/// always restarts at `Extracting`; there is no resume-from-stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extracting,
    Generating,
    Validating,
    Saving,
    Completed,
    Failed,
}

impl Stage {
    /// Progress checkpoint reported at the start of this stage.
    ///
    /// Monotonically increasing through the stage order; 100 only on
    /// completion.
    pub fn percentage(&self) -> u8 {
        match self {
            Stage::Extracting => 10,
            Stage::Generating => 40,
            Stage::Validating => 70,
            Stage::Saving => 90,
            Stage::Completed => 100,
            Stage::Failed => 100,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extracting => "extracting",
            Stage::Generating => "generating",
            Stage::Validating => "validating",
            Stage::Saving => "saving",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "extracting" => Some(Stage::Extracting),
            "generating" => Some(Stage::Generating),
            "validating" => Some(Stage::Validating),
            "saving" => Some(Stage::Saving),
            "completed" => Some(Stage::Completed),
            "failed" => Some(Stage::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Progress and outcome
// ============================================================================

/// Latest progress of one execution attempt.
///
/// Ephemeral: overwritten on each stage transition and decays with the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub stage: Stage,
    pub percentage: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn for_stage(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            percentage: stage.percentage(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Terminal outcome written once per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Outcome {
    pub fn success(item_count: i64, page_count: i64) -> Self {
        Self {
            success: true,
            item_count: Some(item_count),
            page_count: Some(page_count),
            error_message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            item_count: None,
            page_count: None,
            error_message: Some(message.into()),
        }
    }
}

// ============================================================================
// Policies
// ============================================================================

/// Exponential backoff from a fixed base delay, bounded attempt count.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::seconds(5),
            max_delay: Duration::seconds(3600),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given the number of attempts made.
    pub fn delay_for(&self, attempts_made: i32) -> Duration {
        let exp = attempts_made.saturating_sub(1).clamp(0, 30) as u32;
        let delay = self.base_delay * 2i32.saturating_pow(exp);
        delay.min(self.max_delay)
    }
}

/// Retention bounds for terminal jobs so the backing store stays bounded.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub max_terminal: usize,
    pub max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_terminal: 200,
            max_age: Duration::hours(24),
        }
    }
}

/// Outcome of `mark_failed`: whether the job will run again.
#[derive(Debug, Clone, Copy)]
pub struct RetryDisposition {
    pub will_retry: bool,
    pub attempts_made: i32,
}

// ============================================================================
// Job model
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    // Core identity
    pub quiz_id: String,
    pub owner_id: String,
    pub dedup_key: String,

    // Input locator
    pub file_path: String,
    pub display_name: String,

    // State
    #[builder(default)]
    pub status: JobStatus,
    #[builder(default, setter(strip_option))]
    pub stage: Option<Stage>,

    // Attempts
    #[builder(default = 0)]
    pub attempts_made: i32,
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: i32,

    // Retry scheduling
    #[builder(default, setter(strip_option))]
    pub next_run_at: Option<DateTime<Utc>>,

    // Error tracking
    #[builder(default, setter(strip_option))]
    pub last_error: Option<String>,

    // Latest progress and terminal outcome
    #[builder(default, setter(strip_option))]
    pub snapshot: Option<ProgressSnapshot>,
    #[builder(default, setter(strip_option))]
    pub outcome: Option<Outcome>,

    // Timestamps
    #[builder(default, setter(strip_option))]
    pub finished_at: Option<DateTime<Utc>>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a fresh pending job for a quiz submission.
    pub fn for_submission(
        quiz_id: &str,
        owner_id: &str,
        file_path: &str,
        display_name: &str,
    ) -> Self {
        Self::builder()
            .quiz_id(quiz_id)
            .owner_id(owner_id)
            .dedup_key(dedup_key(quiz_id))
            .file_path(file_path)
            .display_name(display_name)
            .build()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The attempt number the next execution would carry (1-based).
    pub fn current_attempt(&self) -> i32 {
        self.attempts_made + 1
    }

    /// Check whether the job is due for claiming.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        match self.next_run_at {
            None => true,
            Some(at) => at <= now,
        }
    }
}
