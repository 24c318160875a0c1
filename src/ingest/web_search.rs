// src/ingest/web_search.rs
//! Generic web-search source (DuckDuckGo HTML endpoint).
//!
//! Result links on that endpoint are redirects (`/l/?uddg=<target>`); they are
//! decoded to the target URL so dedup sees the real page.

use async_trait::async_trait;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::ingest::encode_component;
use crate::ingest::source_client::parse_listing;
use crate::ingest::types::{ListingBatch, ListingItem, ListingSource, PageFetcher, TemplateFailure};
use crate::query::Query;

const RESULT_SELECTORS: &[&str] = &[".result", ".web-result", ".results_links"];

pub struct WebSearchSource {
    endpoint: String,
    fetcher: Arc<dyn PageFetcher>,
    timeout: Duration,
}

impl WebSearchSource {
    /// `endpoint` must contain a `{query}` placeholder.
    pub fn new(endpoint: &str, fetcher: Arc<dyn PageFetcher>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            fetcher,
            timeout,
        }
    }

    pub fn search_url(&self, query: &Query) -> String {
        self.endpoint
            .replace("{query}", &encode_component(&search_terms(query)))
    }
}

/// "<location> festivals <month> <interests...>"
pub fn search_terms(query: &Query) -> String {
    let mut terms = format!("{} festivals {}", query.location(), query.month());
    for interest in query.interests() {
        terms.push(' ');
        terms.push_str(interest);
    }
    terms
}

#[async_trait]
impl ListingSource for WebSearchSource {
    async fn fetch_listings(&self, query: &Query) -> ListingBatch {
        let url = self.search_url(query);
        let mut batch = ListingBatch::default();

        match self.fetcher.fetch(&url, self.timeout).await {
            Ok(html) => {
                let selectors: Vec<String> = RESULT_SELECTORS.iter().map(|s| s.to_string()).collect();
                batch.items = parse_listing(&html, &url, &selectors)
                    .into_iter()
                    .filter_map(unwrap_redirect)
                    .collect();
                debug!(target: "sources", source = "web-search", items = batch.items.len(), "search parsed");
            }
            Err(error) => {
                warn!(target: "sources", source = "web-search", %url, %error, "search fetch failed");
                counter!("festival_fetch_errors_total").increment(1);
                batch.failures.push(TemplateFailure { url, error });
            }
        }

        batch
    }

    fn name(&self) -> &str {
        "web-search"
    }
}

/// Replace a search-engine redirect link by its target; drop links that stay
/// on the search engine (ads, pagination).
fn unwrap_redirect(mut item: ListingItem) -> Option<ListingItem> {
    let parsed = Url::parse(&item.link).ok()?;
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    if !host.ends_with("duckduckgo.com") {
        return Some(item);
    }
    let target = parsed
        .query_pairs()
        .find(|(k, _)| k == "uddg")
        .map(|(_, v)| v.into_owned())?;
    let target_url = Url::parse(&target).ok()?;
    if !matches!(target_url.scheme(), "http" | "https") {
        return None;
    }
    if target_url
        .host_str()
        .is_some_and(|h| h.ends_with("duckduckgo.com"))
    {
        return None;
    }
    item.link = target_url.to_string();
    Some(item)
}
