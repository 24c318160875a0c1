// src/config/pipeline.rs
//! Pipeline thresholds, timeouts and source descriptors.
//!
//! Resolution order:
//! 1) `$FESTIVAL_CONFIG_PATH`
//! 2) `config/pipeline.toml`
//! 3) built-in defaults (two seed listing sources)
//!
//! `FESTIVAL_MIN_RESULTS` and `FESTIVAL_CACHE_TTL_SECS` override the file.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PIPELINE_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_PIPELINE_CONFIG_PATH: &str = "FESTIVAL_CONFIG_PATH";
pub const ENV_MIN_RESULTS: &str = "FESTIVAL_MIN_RESULTS";
pub const ENV_CACHE_TTL_SECS: &str = "FESTIVAL_CACHE_TTL_SECS";

/// One external listing source. Templates may use `{location}`, `{month}`,
/// `{location_slug}` and `{month_slug}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    #[serde(alias = "urlTemplates")]
    pub url_templates: Vec<String>,
    #[serde(alias = "itemSelectors")]
    pub item_selectors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Minimum result count; below it the fallback generator fills the gap.
    pub min_results: usize,
    /// Max synthetic records added per invocation.
    pub fallback_cap: usize,
    /// Hard cap on candidates collected from all sources.
    pub candidate_cap: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            min_results: 8,
            fallback_cap: 8,
            candidate_cap: 25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { ttl_secs: 30 * 60 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Per HTTP call.
    pub timeout_ms: u64,
    /// Pause between two template fetches of the same source.
    pub template_delay_ms: u64,
    /// Upper bound for a whole source (all templates + detail pages).
    pub source_timeout_ms: u64,
    /// Detail pages fetched per listing source.
    pub max_pages_per_source: usize,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            template_delay_ms: 1_200,
            source_timeout_ms: 60_000,
            max_pages_per_source: 12,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeSettings {
    /// Minimum spacing between two AI calls, across all workers.
    pub interval_ms: u64,
    pub workers: usize,
}

impl Default for NormalizeSettings {
    fn default() -> Self {
        Self {
            interval_ms: 600,
            workers: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchSettings {
    pub enabled: bool,
    /// Must contain `{query}`.
    pub endpoint: String,
}

impl Default for WebSearchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://html.duckduckgo.com/html/?q={query}".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub limits: Limits,
    pub cache: CacheSettings,
    pub fetch: FetchSettings,
    pub normalize: NormalizeSettings,
    pub web_search: WebSearchSettings,
    pub sources: Vec<SourceDescriptor>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            cache: CacheSettings::default(),
            fetch: FetchSettings::default(),
            normalize: NormalizeSettings::default(),
            web_search: WebSearchSettings::default(),
            sources: default_sources(),
        }
    }
}

impl PipelineConfig {
    /// Load from an explicit TOML path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing pipeline config {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: PipelineConfig = toml::from_str(s)?;
        Ok(cfg.sanitized())
    }

    /// Env path, then `config/pipeline.toml`, then defaults; env overrides last.
    pub fn load_default() -> Result<Self> {
        let cfg = if let Ok(p) = std::env::var(ENV_PIPELINE_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!(
                    "{ENV_PIPELINE_CONFIG_PATH} points to non-existent path"
                ));
            }
            Self::load_from(&pb)?
        } else {
            let p = PathBuf::from(DEFAULT_PIPELINE_CONFIG_PATH);
            if p.exists() {
                Self::load_from(&p)?
            } else {
                Self::default()
            }
        };
        Ok(cfg.with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(v) = parse_env_u64(ENV_MIN_RESULTS) {
            self.limits.min_results = v as usize;
        }
        if let Some(v) = parse_env_u64(ENV_CACHE_TTL_SECS) {
            self.cache.ttl_secs = v;
        }
        self.sanitized()
    }

    /// Clamp nonsensical values back to defaults.
    pub fn sanitized(mut self) -> Self {
        let d = Limits::default();
        if self.limits.candidate_cap == 0 {
            self.limits.candidate_cap = d.candidate_cap;
        }
        if self.limits.fallback_cap == 0 {
            self.limits.fallback_cap = d.fallback_cap;
        }
        if self.cache.ttl_secs == 0 {
            self.cache.ttl_secs = CacheSettings::default().ttl_secs;
        }
        if self.fetch.timeout_ms == 0 {
            self.fetch.timeout_ms = FetchSettings::default().timeout_ms;
        }
        if self.fetch.source_timeout_ms < self.fetch.timeout_ms {
            self.fetch.source_timeout_ms = self.fetch.timeout_ms;
        }
        if self.normalize.workers == 0 {
            self.normalize.workers = 1;
        }
        if !self.web_search.endpoint.contains("{query}") {
            self.web_search.endpoint = WebSearchSettings::default().endpoint;
        }
        self.sources.retain(|s| {
            !s.name.trim().is_empty() && !s.url_templates.is_empty() && !s.item_selectors.is_empty()
        });
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch.timeout_ms)
    }

    pub fn template_delay(&self) -> Duration {
        Duration::from_millis(self.fetch.template_delay_ms)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch.source_timeout_ms)
    }

    pub fn normalize_interval(&self) -> Duration {
        Duration::from_millis(self.normalize.interval_ms)
    }
}

fn parse_env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<u64>().ok())
}

fn default_sources() -> Vec<SourceDescriptor> {
    vec![
        SourceDescriptor {
            name: "allevents".to_string(),
            url_templates: vec![
                "https://allevents.in/{location_slug}/festivals".to_string(),
                "https://allevents.in/{location_slug}/all?q=festival%20{month}".to_string(),
            ],
            item_selectors: vec![
                "li.event-card".to_string(),
                ".event-item".to_string(),
                "a.event-title".to_string(),
            ],
        },
        SourceDescriptor {
            name: "eventbrite".to_string(),
            url_templates: vec![
                "https://www.eventbrite.com/d/{location_slug}/festivals/?q={month}".to_string(),
            ],
            item_selectors: vec![
                "[data-testid='search-event']".to_string(),
                "a.event-card-link".to_string(),
                ".search-event-card-wrapper".to_string(),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn toml_overrides_and_defaults_merge() {
        let s = r#"
[limits]
min_results = 5

[cache]
ttl_secs = 60

[[sources]]
name = "local-guide"
url_templates = ["https://guide.example/{location_slug}/events"]
item_selectors = [".card"]
"#;
        let cfg = PipelineConfig::from_toml_str(s).unwrap();
        assert_eq!(cfg.limits.min_results, 5);
        assert_eq!(cfg.limits.candidate_cap, 25);
        assert_eq!(cfg.cache.ttl_secs, 60);
        assert_eq!(cfg.sources.len(), 1);
        assert_eq!(cfg.sources[0].name, "local-guide");
    }

    #[test]
    fn camel_case_descriptor_keys_are_accepted() {
        let s = r#"
[[sources]]
name = "x"
urlTemplates = ["https://x.example/{location}"]
itemSelectors = ["a"]
"#;
        let cfg = PipelineConfig::from_toml_str(s).unwrap();
        assert_eq!(cfg.sources[0].url_templates.len(), 1);
    }

    #[test]
    fn sanitize_restores_zero_values() {
        let s = r#"
[limits]
candidate_cap = 0
fallback_cap = 0

[cache]
ttl_secs = 0

[normalize]
workers = 0
"#;
        let cfg = PipelineConfig::from_toml_str(s).unwrap();
        assert_eq!(cfg.limits.candidate_cap, 25);
        assert_eq!(cfg.limits.fallback_cap, 8);
        assert_eq!(cfg.cache.ttl_secs, 1800);
        assert_eq!(cfg.normalize.workers, 1);
    }

    #[test]
    fn incomplete_descriptors_are_dropped() {
        let s = r#"
[[sources]]
name = "empty"
url_templates = []
item_selectors = ["a"]
"#;
        let cfg = PipelineConfig::from_toml_str(s).unwrap();
        assert!(cfg.sources.is_empty());
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_PIPELINE_CONFIG_PATH);
        env::remove_var(ENV_MIN_RESULTS);
        env::remove_var(ENV_CACHE_TTL_SECS);

        // No files in temp CWD -> built-in defaults
        let cfg = PipelineConfig::load_default().unwrap();
        assert_eq!(cfg, PipelineConfig::default());

        // Env path wins, numeric env overrides apply on top
        let p = tmp.path().join("custom.toml");
        fs::write(&p, "[limits]\nmin_results = 3\n").unwrap();
        env::set_var(ENV_PIPELINE_CONFIG_PATH, p.display().to_string());
        env::set_var(ENV_CACHE_TTL_SECS, "120");
        let cfg = PipelineConfig::load_default().unwrap();
        assert_eq!(cfg.limits.min_results, 3);
        assert_eq!(cfg.cache.ttl_secs, 120);

        env::set_var(ENV_PIPELINE_CONFIG_PATH, tmp.path().join("missing.toml"));
        assert!(PipelineConfig::load_default().is_err());

        env::remove_var(ENV_PIPELINE_CONFIG_PATH);
        env::remove_var(ENV_CACHE_TTL_SECS);
        env::set_current_dir(&old).unwrap();
    }
}
