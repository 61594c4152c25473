// Main entry point for the quiz processing server

use std::sync::Arc;

use anyhow::{Context, Result};
use quiz_core::auth::JwtService;
use quiz_core::broadcast::RoomBroadcaster;
use quiz_core::gateway::rooms::RoomRegistry;
use quiz_core::jobs::{
    JobQueue, JobStartLimiter, JobWorker, JobWorkerConfig, PostgresJobQueue, QuizPipeline,
};
use quiz_core::nlp::HttpNlpClient;
use quiz_core::server::build_app;
use quiz_core::store::PostgresQuizStore;
use quiz_core::Config;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,quiz_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting quiz processing server");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Wire dependencies explicitly
    let queue: Arc<dyn JobQueue> = Arc::new(PostgresJobQueue::new(pool.clone()));
    let store = Arc::new(PostgresQuizStore::new(pool.clone()));
    let nlp = Arc::new(HttpNlpClient::new(&config.nlp_service_url)?);
    let rooms = RoomRegistry::new();
    let broadcaster = Arc::new(RoomBroadcaster::new(rooms.clone()));
    let jwt = Arc::new(JwtService::new(&config.jwt_secret, config.jwt_issuer.clone()));

    let pipeline = Arc::new(QuizPipeline::new(
        queue.clone(),
        store,
        nlp,
        broadcaster,
        config.min_extracted_chars,
        config.questions_per_quiz,
    ));
    let limiter = Arc::new(JobStartLimiter::new(config.job_starts_per_minute));
    let worker_config = JobWorkerConfig {
        concurrency: config.worker_concurrency,
        ..Default::default()
    };
    let worker = Arc::new(JobWorker::with_config(
        queue,
        pipeline,
        limiter,
        worker_config,
    ));

    // Spawn the worker under a shutdown token
    let shutdown = CancellationToken::new();
    let worker_shutdown = shutdown.clone();
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = worker.run(worker_shutdown).await {
            tracing::error!(error = %e, "Job worker exited with error");
        }
    });

    // Build and serve the app
    let app = build_app(rooms, jwt);
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    // Stop claiming new jobs and let in-flight attempts drain
    shutdown.cancel();
    let _ = worker_handle.await;
    tracing::info!("Server stopped");

    Ok(())
}
