//! Error taxonomy.
//!
//! Per-unit failures (one fetch, one page, one candidate, one store write) are
//! contained where they happen; only `PipelineError` ever reaches a caller.
//! An empty result is not an error; it comes back as an empty list plus a
//! message.

use thiserror::Error;

/// A single HTTP fetch failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// A page could not be turned into a candidate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionFailure {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("no title found")]
    NoTitle,
}

/// The normalization step did not accept a candidate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("declined by model")]
    Declined,
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    /// No answer at all (disabled backend, transport error, limit hit).
    #[error("model unavailable")]
    Unavailable,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("persistence failed: {0}")]
pub struct PersistenceError(pub String);

/// Failures visible to the caller of the pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}
