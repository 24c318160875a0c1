// src/lib.rs
// Public library surface for integration tests and the Shuttle binary.

pub mod api;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod error;
pub mod fallback;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod query;
pub mod store;

// Scraping side: fetch, listing sources, extraction, dedup, fan-out
pub mod ingest;

// Normalization side: model client, call gate, normalizer
pub mod analyze;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::error::{PipelineError, Rejection};
pub use crate::model::{CandidateEvent, CanonicalEvent, Origin};
pub use crate::pipeline::{Pipeline, PipelineOutcome};
pub use crate::query::{Query, QueryInput};
