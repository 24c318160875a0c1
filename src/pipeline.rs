// src/pipeline.rs
//! Per-query controller: cache check, scrape, normalize, top up with
//! fallbacks, assemble, persist, cache.
//!
//! Stage order is fixed; `InsufficientFallback` is entered at most once and
//! only when normalization produced fewer than the minimum.

use metrics::counter;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::analyze::ai_adapter::DynAiClient;
use crate::analyze::normalizer::Normalizer;
use crate::cache::ResultCache;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::fallback::FallbackGenerator;
use crate::ingest::ensure_metrics_described;
use crate::ingest::orchestrator::Orchestrator;
use crate::ingest::types::PageFetcher;
use crate::model::{CanonicalEvent, Origin};
use crate::query::{Fingerprint, Query, QueryInput};
use crate::store::DocumentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CacheCheck,
    Scraping,
    Deduplicating,
    Normalizing,
    InsufficientFallback,
    NormalizingFallback,
    Assembling,
    Persisting,
    CacheStore,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::CacheCheck => "cache_check",
            Stage::Scraping => "scraping",
            Stage::Deduplicating => "deduplicating",
            Stage::Normalizing => "normalizing",
            Stage::InsufficientFallback => "insufficient_fallback",
            Stage::NormalizingFallback => "normalizing_fallback",
            Stage::Assembling => "assembling",
            Stage::Persisting => "persisting",
            Stage::CacheStore => "cache_store",
            Stage::Done => "done",
        };
        f.write_str(s)
    }
}

/// What the caller gets back.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub events: Vec<CanonicalEvent>,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub struct Pipeline {
    orchestrator: Orchestrator,
    normalizer: Normalizer,
    fallback: FallbackGenerator,
    cache: Arc<ResultCache>,
    store: Arc<dyn DocumentStore>,
}

impl Pipeline {
    pub fn new(
        orchestrator: Orchestrator,
        normalizer: Normalizer,
        fallback: FallbackGenerator,
        cache: Arc<ResultCache>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            orchestrator,
            normalizer,
            fallback,
            cache,
            store,
        }
    }

    pub fn from_config(
        cfg: &PipelineConfig,
        fetcher: Arc<dyn PageFetcher>,
        client: DynAiClient,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self::new(
            Orchestrator::from_config(cfg, fetcher),
            Normalizer::from_config(cfg, client),
            FallbackGenerator::from_config(cfg),
            Arc::new(ResultCache::new(cfg.cache_ttl())),
            store,
        )
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    /// Validate the raw input, then run.
    pub async fn run(&self, input: QueryInput) -> Result<PipelineOutcome, PipelineError> {
        let query = Query::try_from(input)?;
        Ok(self.discover(&query).await)
    }

    pub async fn discover(&self, query: &Query) -> PipelineOutcome {
        ensure_metrics_described();
        let t0 = Instant::now();
        let fp = query.fingerprint();

        enter(Stage::CacheCheck, &fp);
        if let Some(events) = self.cache.get(&fp) {
            info!(target: "pipeline", fingerprint = %fp, events = events.len(), "served from cache");
            enter(Stage::Done, &fp);
            return PipelineOutcome {
                message: empty_message(&events, query),
                events,
                cached: true,
            };
        }

        enter(Stage::Scraping, &fp);
        let candidates = self.orchestrator.collect(query).await;

        // merged through the deduplicator while collecting
        enter(Stage::Deduplicating, &fp);
        debug!(target: "pipeline", fingerprint = %fp, unique = candidates.len(), "candidates deduplicated");

        enter(Stage::Normalizing, &fp);
        let mut events = self.normalizer.normalize_all(candidates, query).await;
        let scraped = events.len();

        if scraped < self.fallback.min_results() {
            enter(Stage::InsufficientFallback, &fp);
            let generated = self.fallback.generate(query, scraped);
            if !generated.is_empty() {
                enter(Stage::NormalizingFallback, &fp);
                events.extend(self.normalizer.normalize_fallback(generated, query).await);
            }
        }

        enter(Stage::Assembling, &fp);
        assemble(&mut events);

        enter(Stage::Persisting, &fp);
        let persisted = self.persist(&events).await;

        // empty lists are cached too, so a repeat inside the TTL never refetches
        enter(Stage::CacheStore, &fp);
        self.cache.put(fp.clone(), events.clone());

        enter(Stage::Done, &fp);
        info!(
            target: "pipeline",
            fingerprint = %fp,
            scraped,
            total = persisted.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "discovery finished"
        );
        PipelineOutcome {
            message: empty_message(&persisted, query),
            events: persisted,
            cached: false,
        }
    }

    /// Copy of `events` with store ids filled in; ids stay `None` when the
    /// store fails.
    async fn persist(&self, events: &[CanonicalEvent]) -> Vec<CanonicalEvent> {
        let mut out = events.to_vec();
        if out.is_empty() {
            return out;
        }
        match self.store.insert_many(events).await {
            Ok(ids) if ids.len() == out.len() => {
                for (ev, id) in out.iter_mut().zip(ids) {
                    ev.id = Some(id);
                }
            }
            Ok(ids) => {
                warn!(target: "pipeline", expected = out.len(), got = ids.len(), "store returned wrong id count");
                counter!("festival_persist_errors_total").increment(1);
            }
            Err(error) => {
                warn!(target: "pipeline", %error, records = out.len(), "persistence failed; returning unsaved results");
                counter!("festival_persist_errors_total").increment(1);
            }
        }
        out
    }
}

fn enter(stage: Stage, fp: &Fingerprint) {
    debug!(target: "pipeline", fingerprint = %fp, %stage, "stage");
}

/// Scraped before fallback, then title (case-insensitive). Stable.
pub fn assemble(events: &mut [CanonicalEvent]) {
    events.sort_by(|a, b| {
        let rank = |o: Origin| match o {
            Origin::Scraped => 0u8,
            Origin::Fallback => 1,
        };
        rank(a.origin)
            .cmp(&rank(b.origin))
            .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
    });
}

fn empty_message(events: &[CanonicalEvent], query: &Query) -> Option<String> {
    events.is_empty().then(|| {
        format!(
            "No festivals found for {} in {}.",
            query.location(),
            query.month()
        )
    })
}
