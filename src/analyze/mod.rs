// src/analyze/mod.rs
//! Candidate normalization: model client, call spacing and the normalizer
//! that turns `CandidateEvent`s into `CanonicalEvent`s.

pub mod ai_adapter;
pub mod gate;
pub mod normalizer;

pub use ai_adapter::{build_client_from_config, AiClient, DynAiClient};
pub use normalizer::Normalizer;
