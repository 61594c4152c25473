pub mod job;
pub mod memory;
pub mod pipeline;
pub mod postgres;
pub mod queue;
pub mod rate_limit;
pub mod worker;

pub use job::{
    dedup_key, Job, JobStatus, Outcome, ProgressSnapshot, RetentionPolicy, RetryDisposition,
    RetryPolicy, Stage, DEFAULT_MAX_ATTEMPTS,
};
pub use memory::InMemoryJobQueue;
pub use pipeline::{PipelineError, QuizPipeline};
pub use postgres::PostgresJobQueue;
pub use queue::{EnqueueResult, JobQueue, JobStatusView};
pub use rate_limit::JobStartLimiter;
pub use worker::{JobWorker, JobWorkerConfig};
