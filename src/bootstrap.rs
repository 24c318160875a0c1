// src/bootstrap.rs
//! Wiring from config files and env to a ready `AppState`.

use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use crate::analyze::ai_adapter::build_client_from_config;
use crate::api::AppState;
use crate::config::ai::{AiConfig, DEFAULT_AI_CONFIG_PATH};
use crate::config::PipelineConfig;
use crate::ingest::fetch::HttpFetcher;
use crate::pipeline::Pipeline;
use crate::store::{DocumentStore, JsonFileStore, MemoryStore};

/// Directory for the JSON file store; unset → in-memory store.
pub const ENV_STORE_DIR: &str = "FESTIVAL_STORE_DIR";
pub const ENV_AI_CONFIG_PATH: &str = "FESTIVAL_AI_CONFIG_PATH";

pub struct Runtime {
    pub config: PipelineConfig,
    pub ai: AiConfig,
    pub state: AppState,
}

impl Runtime {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = PipelineConfig::load_default().context("load pipeline config")?;
        let ai_path =
            std::env::var(ENV_AI_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_AI_CONFIG_PATH.to_string());
        let ai = AiConfig::load_or_disabled(&ai_path);
        Self::build(config, ai)
    }

    pub fn build(config: PipelineConfig, ai: AiConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn DocumentStore> = match std::env::var(ENV_STORE_DIR) {
            Ok(dir) if !dir.trim().is_empty() => Arc::new(
                JsonFileStore::open(dir.trim()).context("open JSON file store")?,
            ),
            _ => Arc::new(MemoryStore::new()),
        };
        let fetcher = Arc::new(HttpFetcher::new(&config.fetch.user_agent)?);
        let client = build_client_from_config(&ai);

        // Safe diagnostics: never log the key itself
        info!(
            provider = client.provider_name(),
            ai_enabled = ai.enabled,
            key_len = ai.api_key.len(),
            sources = config.sources.len(),
            web_search = config.web_search.enabled,
            min_results = config.limits.min_results,
            cache_ttl_secs = config.cache.ttl_secs,
            "runtime configured"
        );

        let pipeline = Pipeline::from_config(&config, fetcher, client, store);
        Ok(Self {
            config,
            ai,
            state: AppState::new(pipeline),
        })
    }
}
