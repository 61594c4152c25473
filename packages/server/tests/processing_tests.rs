//! End-to-end pipeline tests against in-memory backends and a scripted
//! NLP service fake.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use serde_json::json;
use tokio::sync::Mutex;

use quiz_core::broadcast::{BaseProgressBroadcaster, RoomBroadcaster};
use quiz_core::gateway::rooms::RoomRegistry;
use quiz_core::jobs::{
    InMemoryJobQueue, JobQueue, JobStatus, Outcome, ProgressSnapshot, QuizPipeline,
    RetentionPolicy, RetryPolicy,
};
use quiz_core::nlp::{BaseNlpService, Difficulty, Generation, NlpError, PdfExtraction};
use quiz_core::store::{BaseQuizStore, InMemoryQuizStore, QuizStatus};
use quiz_core::{ProcessingService, QuizSubmission};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Clone, Copy)]
enum ExtractMode {
    Ok,
    ShortText,
    Timeout,
}

#[derive(Clone, Copy)]
enum GenerateMode {
    Ok,
    Empty,
    Unavailable,
}

struct FakeNlpService {
    extract_mode: ExtractMode,
    generate_mode: GenerateMode,
    extract_calls: AtomicUsize,
    generate_calls: AtomicUsize,
}

impl FakeNlpService {
    fn new(extract_mode: ExtractMode, generate_mode: GenerateMode) -> Arc<Self> {
        Arc::new(Self {
            extract_mode,
            generate_mode,
            extract_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
        })
    }

    fn extract_calls(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }

    fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BaseNlpService for FakeNlpService {
    async fn extract(&self, _file_path: &str, _filename: &str) -> Result<PdfExtraction, NlpError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        match self.extract_mode {
            ExtractMode::Ok => Ok(serde_json::from_value(json!({
                "success": true,
                "text": "x".repeat(500),
                "metadata": { "pageCount": 12, "wordCount": 80, "charCount": 500 }
            }))
            .unwrap()),
            ExtractMode::ShortText => Ok(serde_json::from_value(json!({
                "success": true,
                "text": "x".repeat(40),
                "metadata": { "pageCount": 1 }
            }))
            .unwrap()),
            ExtractMode::Timeout => Err(NlpError::Timeout),
        }
    }

    async fn generate(
        &self,
        _text: &str,
        count: u32,
        _difficulty: Difficulty,
    ) -> Result<Generation, NlpError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        match self.generate_mode {
            GenerateMode::Ok => {
                // Both raw shapes the service is known to emit
                let keyed = json!({
                    "questionText": "What is the capital of France?",
                    "options": { "A": "Paris", "B": "Lyon", "C": "Nice", "D": "Lille" },
                    "correctAnswer": "A",
                    "explanation": "Paris is the capital.",
                    "difficulty": "easy",
                    "qualityScore": 0.9
                });
                let listed = json!({
                    "question_text": "What is 2 + 2?",
                    "options": [
                        { "id": "A", "text": "3" },
                        { "id": "B", "text": "4" },
                        { "id": "C", "text": "5" },
                        { "id": "D", "text": "6" }
                    ],
                    "correct_answer": "b",
                    "explanation": "Basic arithmetic.",
                    "difficulty": "easy",
                    "quality_score": 0.8
                });
                let questions: Vec<_> = (0..count)
                    .map(|i| if i % 2 == 0 { keyed.clone() } else { listed.clone() })
                    .collect();
                Ok(Generation {
                    total_generated: questions.len() as i64,
                    total_valid: questions.len() as i64,
                    questions,
                })
            }
            GenerateMode::Empty => Ok(Generation {
                questions: vec![],
                total_generated: 0,
                total_valid: 0,
            }),
            GenerateMode::Unavailable => Err(NlpError::Status {
                status: 503,
                body: "generation backend down".to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct RecordingBroadcaster {
    progress: Mutex<Vec<ProgressSnapshot>>,
    terminal: Mutex<Vec<Outcome>>,
}

impl RecordingBroadcaster {
    async fn percentages(&self) -> Vec<u8> {
        self.progress.lock().await.iter().map(|s| s.percentage).collect()
    }

    async fn terminal_events(&self) -> Vec<Outcome> {
        self.terminal.lock().await.clone()
    }
}

#[async_trait]
impl BaseProgressBroadcaster for RecordingBroadcaster {
    async fn notify_progress(&self, _owner_id: &str, _quiz_id: &str, snapshot: &ProgressSnapshot) {
        self.progress.lock().await.push(snapshot.clone());
    }

    async fn notify_terminal(&self, _owner_id: &str, _quiz_id: &str, outcome: &Outcome) {
        self.terminal.lock().await.push(outcome.clone());
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    queue: Arc<InMemoryJobQueue>,
    store: Arc<InMemoryQuizStore>,
    nlp: Arc<FakeNlpService>,
    broadcaster: Arc<RecordingBroadcaster>,
    pipeline: QuizPipeline,
    service: ProcessingService,
}

impl Harness {
    fn new(extract_mode: ExtractMode, generate_mode: GenerateMode) -> Self {
        // Zero backoff so retries are immediately claimable
        let queue = Arc::new(InMemoryJobQueue::with_policies(
            RetryPolicy {
                base_delay: Duration::zero(),
                max_delay: Duration::zero(),
            },
            RetentionPolicy::default(),
        ));
        let store = Arc::new(InMemoryQuizStore::new());
        let nlp = FakeNlpService::new(extract_mode, generate_mode);
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let pipeline = QuizPipeline::new(
            queue.clone(),
            store.clone(),
            nlp.clone(),
            broadcaster.clone(),
            100,
            4,
        );
        let service = ProcessingService::new(queue.clone());
        Self {
            queue,
            store,
            nlp,
            broadcaster,
            pipeline,
            service,
        }
    }

    fn submission(quiz_id: &str) -> QuizSubmission {
        QuizSubmission {
            quiz_id: quiz_id.to_string(),
            owner_id: "user-1".to_string(),
            file_path: format!("/tmp/{quiz_id}.pdf"),
            display_name: "notes.pdf".to_string(),
        }
    }

    /// Claim and run attempts until the queue has nothing due.
    async fn run_until_settled(&self) {
        loop {
            let claimed = self.queue.claim("test-worker", 10).await.unwrap();
            if claimed.is_empty() {
                break;
            }
            for job in &claimed {
                self.pipeline.run(job).await;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn happy_path_persists_questions_and_completes() {
    let h = Harness::new(ExtractMode::Ok, GenerateMode::Ok);
    h.service.submit(Harness::submission("pdf-1")).await.unwrap();
    h.run_until_settled().await;

    let view = h.service.status("pdf-1").await.unwrap().unwrap();
    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.attempts_made, 1);

    let outcome = view.outcome.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.item_count, Some(4));
    assert_eq!(outcome.page_count, Some(12));

    let record = h.store.get("pdf-1").await.unwrap().unwrap();
    assert_eq!(record.status, QuizStatus::Completed);
    assert_eq!(record.question_count, 4);
    assert_eq!(record.page_count, 12);
    assert_eq!(record.extracted_chars, 500);

    let questions = h.store.questions("pdf-1").await;
    assert_eq!(questions.len(), 4);
    // Both raw shapes normalized to the same record layout
    assert_eq!(questions[0].correct_answer, "A");
    assert_eq!(questions[1].correct_answer, "B");
    assert_eq!(questions[1].options.len(), 4);
}

#[tokio::test]
async fn progress_percentages_are_monotonic_and_end_at_100() {
    let h = Harness::new(ExtractMode::Ok, GenerateMode::Ok);
    h.service.submit(Harness::submission("pdf-1")).await.unwrap();
    h.run_until_settled().await;

    let percentages = h.broadcaster.percentages().await;
    assert_eq!(percentages, vec![10, 40, 70, 90, 100]);

    let terminal = h.broadcaster.terminal_events().await;
    assert_eq!(terminal.len(), 1);
    assert!(terminal[0].success);
}

#[tokio::test]
async fn duplicate_submission_executes_once() {
    let h = Harness::new(ExtractMode::Ok, GenerateMode::Ok);
    let first = h.service.submit(Harness::submission("pdf-1")).await.unwrap();
    let second = h.service.submit(Harness::submission("pdf-1")).await.unwrap();

    assert!(!first.coalesced);
    assert!(second.coalesced);
    assert_eq!(first.job_id, second.job_id);

    h.run_until_settled().await;
    assert_eq!(h.nlp.extract_calls(), 1);
}

#[tokio::test]
async fn timeout_on_every_attempt_exhausts_retries() {
    let h = Harness::new(ExtractMode::Timeout, GenerateMode::Ok);
    h.service.submit(Harness::submission("pdf-1")).await.unwrap();
    h.run_until_settled().await;

    let view = h.service.status("pdf-1").await.unwrap().unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.attempts_made, 3);
    assert_eq!(h.nlp.extract_calls(), 3);

    let outcome = view.outcome.unwrap();
    assert!(!outcome.success);
    assert!(outcome.error_message.unwrap().contains("timed out"));

    // Durable failure reaches the quiz record with the message
    let record = h.store.get("pdf-1").await.unwrap().unwrap();
    assert_eq!(record.status, QuizStatus::Failed);
    assert!(record.error_message.unwrap().contains("timed out"));
}

#[tokio::test]
async fn terminal_failure_broadcast_only_after_last_attempt() {
    let h = Harness::new(ExtractMode::Timeout, GenerateMode::Ok);
    h.service.submit(Harness::submission("pdf-1")).await.unwrap();
    h.run_until_settled().await;

    // Three failed attempts but exactly one terminal event
    let terminal = h.broadcaster.terminal_events().await;
    assert_eq!(terminal.len(), 1);
    assert!(!terminal[0].success);
}

#[tokio::test]
async fn insufficient_text_never_reaches_generation() {
    let h = Harness::new(ExtractMode::ShortText, GenerateMode::Ok);
    h.service.submit(Harness::submission("pdf-1")).await.unwrap();
    h.run_until_settled().await;

    assert_eq!(h.nlp.generate_calls(), 0);

    let view = h.service.status("pdf-1").await.unwrap().unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert!(view
        .outcome
        .unwrap()
        .error_message
        .unwrap()
        .contains("insufficient"));
}

#[tokio::test]
async fn empty_generation_fails_the_job() {
    let h = Harness::new(ExtractMode::Ok, GenerateMode::Empty);
    h.service.submit(Harness::submission("pdf-1")).await.unwrap();
    h.run_until_settled().await;

    let view = h.service.status("pdf-1").await.unwrap().unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert!(view
        .outcome
        .unwrap()
        .error_message
        .unwrap()
        .contains("no questions"));

    // No partial quiz left behind as completed
    let record = h.store.get("pdf-1").await.unwrap().unwrap();
    assert_eq!(record.status, QuizStatus::Failed);
}

#[tokio::test]
async fn generation_failure_is_attributed_to_generation() {
    let h = Harness::new(ExtractMode::Ok, GenerateMode::Unavailable);
    h.service.submit(Harness::submission("pdf-1")).await.unwrap();
    h.run_until_settled().await;

    let view = h.service.status("pdf-1").await.unwrap().unwrap();
    assert_eq!(view.status, JobStatus::Failed);

    // A generation-endpoint failure must not read as an extraction failure
    let message = view.outcome.unwrap().error_message.unwrap();
    assert!(message.contains("question generation failed"));
    assert!(message.contains("503"));
    assert!(!message.contains("extraction"));
}

#[tokio::test]
async fn undeliverable_broadcasts_never_change_the_outcome() {
    // Fan events into a registry nobody has joined - every publish drops
    let queue = Arc::new(InMemoryJobQueue::with_policies(
        RetryPolicy {
            base_delay: Duration::zero(),
            max_delay: Duration::zero(),
        },
        RetentionPolicy::default(),
    ));
    let store = Arc::new(InMemoryQuizStore::new());
    let nlp = FakeNlpService::new(ExtractMode::Ok, GenerateMode::Ok);
    let broadcaster = Arc::new(RoomBroadcaster::new(RoomRegistry::new()));
    let pipeline = QuizPipeline::new(
        queue.clone(),
        store.clone(),
        nlp,
        broadcaster,
        100,
        4,
    );
    let service = ProcessingService::new(queue.clone());

    service.submit(Harness::submission("pdf-1")).await.unwrap();
    loop {
        let claimed = queue.claim("test-worker", 10).await.unwrap();
        if claimed.is_empty() {
            break;
        }
        for job in &claimed {
            pipeline.run(job).await;
        }
    }

    let view = service.status("pdf-1").await.unwrap().unwrap();
    assert_eq!(view.status, JobStatus::Completed);
    let outcome = view.outcome.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.item_count, Some(4));

    let record = store.get("pdf-1").await.unwrap().unwrap();
    assert_eq!(record.status, QuizStatus::Completed);
    assert_eq!(store.questions("pdf-1").await.len(), 4);
}

#[tokio::test]
async fn cancelled_job_is_never_executed() {
    let h = Harness::new(ExtractMode::Ok, GenerateMode::Ok);
    h.service.submit(Harness::submission("pdf-1")).await.unwrap();
    assert!(h.service.cancel("pdf-1").await.unwrap());

    h.run_until_settled().await;
    assert_eq!(h.nlp.extract_calls(), 0);

    let view = h.service.status("pdf-1").await.unwrap().unwrap();
    assert_eq!(view.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn resubmission_after_failure_starts_fresh() {
    let h = Harness::new(ExtractMode::Timeout, GenerateMode::Ok);
    h.service.submit(Harness::submission("pdf-1")).await.unwrap();
    h.run_until_settled().await;

    let view = h.service.status("pdf-1").await.unwrap().unwrap();
    assert_eq!(view.status, JobStatus::Failed);

    // A terminal job no longer coalesces
    let handle = h.service.submit(Harness::submission("pdf-1")).await.unwrap();
    assert!(!handle.coalesced);
    let view = h.service.status("pdf-1").await.unwrap().unwrap();
    assert_eq!(view.status, JobStatus::Pending);
    assert_eq!(view.attempts_made, 0);
}
