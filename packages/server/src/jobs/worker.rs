//! Background worker that drains the job queue.
//!
//! The `JobWorker` is a long-running service that:
//! - Polls the queue for due jobs, bounded by concurrency and the start
//!   rate limiter
//! - Runs each claimed job through the `QuizPipeline`
//! - Periodically prunes terminal jobs past retention
//!
//! A claimed job always runs to the end of its attempt; shutdown stops
//! claiming new work and waits for in-flight attempts to finish.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::pipeline::QuizPipeline;
use super::queue::JobQueue;
use super::rate_limit::JobStartLimiter;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// Maximum number of jobs executing at once
    pub concurrency: usize,
    /// How long to wait between polls when no jobs are available
    pub poll_interval: Duration,
    /// How often to evict terminal jobs past retention
    pub prune_interval: Duration,
    /// Worker ID for this instance
    pub worker_id: String,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_secs(1),
            prune_interval: Duration::from_secs(300),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

pub struct JobWorker {
    queue: Arc<dyn JobQueue>,
    pipeline: Arc<QuizPipeline>,
    limiter: Arc<JobStartLimiter>,
    config: JobWorkerConfig,
}

impl JobWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        pipeline: Arc<QuizPipeline>,
        limiter: Arc<JobStartLimiter>,
    ) -> Self {
        Self {
            queue,
            pipeline,
            limiter,
            config: JobWorkerConfig::default(),
        }
    }

    pub fn with_config(
        queue: Arc<dyn JobQueue>,
        pipeline: Arc<QuizPipeline>,
        limiter: Arc<JobStartLimiter>,
        config: JobWorkerConfig,
    ) -> Self {
        Self {
            queue,
            pipeline,
            limiter,
            config,
        }
    }

    /// Run the poll loop until the shutdown token fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            concurrency = self.config.concurrency,
            "job worker starting"
        );

        let mut last_prune = tokio::time::Instant::now();

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            if last_prune.elapsed() >= self.config.prune_interval {
                match self.queue.prune().await {
                    Ok(0) => {}
                    Ok(evicted) => debug!(evicted, "pruned terminal jobs"),
                    Err(e) => error!(error = %e, "failed to prune jobs"),
                }
                last_prune = tokio::time::Instant::now();
            }

            // Claim budget is bounded by both concurrency and the start
            // rate window.
            let budget = self.config.concurrency.min(self.limiter.available());
            if budget == 0 {
                self.idle(&shutdown).await;
                continue;
            }

            let jobs = match self.queue.claim(&self.config.worker_id, budget).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(error = %e, "failed to claim jobs");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if jobs.is_empty() {
                self.idle(&shutdown).await;
                continue;
            }

            debug!(count = jobs.len(), "claimed jobs");

            let mut handles = Vec::with_capacity(jobs.len());
            for job in &jobs {
                self.limiter.record_start();
                let pipeline = &self.pipeline;
                handles.push(async move {
                    pipeline.run(job).await;
                });
            }

            // Attempts run to completion even during shutdown.
            futures::future::join_all(handles).await;
        }

        info!(worker_id = %self.config.worker_id, "job worker stopped");
        Ok(())
    }

    async fn idle(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }
}
