// src/ingest/source_client.rs
//! Descriptor-driven listing scraper.
//!
//! Each URL template is rendered and fetched on its own; a failing template
//! contributes nothing and the remaining templates still run.

use async_trait::async_trait;
use metrics::counter;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::SourceDescriptor;
use crate::ingest::types::{ListingBatch, ListingItem, ListingSource, PageFetcher, TemplateFailure};
use crate::ingest::{encode_component, is_boilerplate, normalize_text, slugify};
use crate::model::{truncate_chars, RAW_CONTENT_MAX, TITLE_MAX};
use crate::query::Query;

/// Minimum label length for a listing card to count as an item.
pub const MIN_LABEL_CHARS: usize = 4;

pub struct SourceClient {
    descriptor: SourceDescriptor,
    fetcher: Arc<dyn PageFetcher>,
    timeout: Duration,
    template_delay: Duration,
}

impl SourceClient {
    pub fn new(
        descriptor: SourceDescriptor,
        fetcher: Arc<dyn PageFetcher>,
        timeout: Duration,
        template_delay: Duration,
    ) -> Self {
        Self {
            descriptor,
            fetcher,
            timeout,
            template_delay,
        }
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }
}

#[async_trait]
impl ListingSource for SourceClient {
    async fn fetch_listings(&self, query: &Query) -> ListingBatch {
        let mut batch = ListingBatch::default();
        let mut seen: HashSet<String> = HashSet::new();

        for (i, template) in self.descriptor.url_templates.iter().enumerate() {
            // Spacing between templates of the same source only.
            if i > 0 && !self.template_delay.is_zero() {
                tokio::time::sleep(self.template_delay).await;
            }

            let url = render_template(template, query);
            match self.fetcher.fetch(&url, self.timeout).await {
                Ok(html) => {
                    let items = parse_listing(&html, &url, &self.descriptor.item_selectors);
                    debug!(
                        target: "sources",
                        source = %self.descriptor.name,
                        %url,
                        items = items.len(),
                        "listing parsed"
                    );
                    for item in items {
                        if seen.insert(item.link.clone()) {
                            batch.items.push(item);
                        }
                    }
                }
                Err(error) => {
                    warn!(
                        target: "sources",
                        source = %self.descriptor.name,
                        %url,
                        %error,
                        "listing fetch failed"
                    );
                    counter!("festival_fetch_errors_total").increment(1);
                    batch.failures.push(TemplateFailure { url, error });
                }
            }
        }

        batch
    }

    fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// Fill `{location}`, `{month}` (query-encoded) and `{location_slug}`,
/// `{month_slug}` (path-safe) placeholders.
pub fn render_template(template: &str, query: &Query) -> String {
    template
        .replace("{location_slug}", &slugify(query.location()))
        .replace("{month_slug}", &slugify(query.month()))
        .replace("{location}", &encode_component(query.location()))
        .replace("{month}", &encode_component(query.month()))
}

/// Apply `selectors` in order; the first one matching at least one node wins.
/// A node becomes an item only with a label of `MIN_LABEL_CHARS`+ and a
/// resolvable http(s) link.
pub fn parse_listing(html: &str, base_url: &str, selectors: &[String]) -> Vec<ListingItem> {
    let document = Html::parse_document(html);
    let base = Url::parse(base_url).ok();

    for selector_str in selectors {
        let selector = match Selector::parse(selector_str) {
            Ok(s) => s,
            Err(_) => {
                debug!(target: "sources", selector = %selector_str, "invalid selector skipped");
                continue;
            }
        };
        let nodes: Vec<ElementRef> = document.select(&selector).collect();
        if nodes.is_empty() {
            continue;
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for node in nodes {
            let Some(item) = item_from_node(node, base.as_ref()) else {
                continue;
            };
            if seen.insert(item.link.clone()) {
                out.push(item);
            }
        }
        return out;
    }

    Vec::new()
}

fn item_from_node(node: ElementRef, base: Option<&Url>) -> Option<ListingItem> {
    let anchor = if node.value().name() == "a" {
        Some(node)
    } else {
        static ANCHOR: once_cell::sync::OnceCell<Selector> = once_cell::sync::OnceCell::new();
        let sel = ANCHOR.get_or_init(|| Selector::parse("a[href]").unwrap());
        node.select(sel).next()
    }?;

    let href = anchor.value().attr("href")?;
    let link = resolve_link(href, base)?;

    let label = card_label(node, anchor);
    if label.chars().count() < MIN_LABEL_CHARS || is_boilerplate(&label) {
        return None;
    }

    let card_text = normalize_text(&node.text().collect::<Vec<_>>().join(" "));
    Some(ListingItem {
        title: truncate_chars(&label, TITLE_MAX),
        link,
        card_text: truncate_chars(&card_text, RAW_CONTENT_MAX),
    })
}

/// Prefer a heading or title-ish element inside the card; else the anchor text.
fn card_label(node: ElementRef, anchor: ElementRef) -> String {
    static HEADING: once_cell::sync::OnceCell<Selector> = once_cell::sync::OnceCell::new();
    let sel = HEADING.get_or_init(|| {
        Selector::parse("h1, h2, h3, h4, [class*='title'], [class*='name']").unwrap()
    });
    if node.value().name() != "a" {
        for el in node.select(sel) {
            let t = normalize_text(&el.text().collect::<Vec<_>>().join(" "));
            if t.chars().count() >= MIN_LABEL_CHARS {
                return t;
            }
        }
    }
    let from_anchor = normalize_text(&anchor.text().collect::<Vec<_>>().join(" "));
    if !from_anchor.is_empty() {
        return from_anchor;
    }
    anchor
        .value()
        .attr("title")
        .or_else(|| anchor.value().attr("aria-label"))
        .map(normalize_text)
        .unwrap_or_default()
}

/// Resolve absolute or site-relative links; only http(s) survives.
pub fn resolve_link(href: &str, base: Option<&Url>) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") || lower.starts_with("tel:") {
        return None;
    }
    let url = match Url::parse(href) {
        Ok(u) => u,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(href).ok()?,
        Err(_) => return None,
    };
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    Some(url.to_string())
}
