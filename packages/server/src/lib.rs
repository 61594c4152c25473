// Quiz Generation API - Processing Core
//
// This crate provides the asynchronous document-to-quiz pipeline: the job
// queue with its dedup/retry semantics, the staged worker that drives the
// external NLP service, and the real-time gateway that fans progress out to
// subscribed clients. Request routing and domain CRUD live elsewhere and
// consume this crate through `ProcessingService`.

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod gateway;
pub mod jobs;
pub mod nlp;
pub mod server;
pub mod service;
pub mod store;

pub use config::*;
pub use service::{JobHandle, ProcessingService, QuizSubmission};
