// src/ingest/mod.rs
pub mod dedup;
pub mod extractor;
pub mod fetch;
pub mod orchestrator;
pub mod source_client;
pub mod types;
pub mod web_search;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics). Covers the
/// whole pipeline, not just ingest.
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "festival_fetch_errors_total",
            "Listing/detail fetches that failed or timed out."
        );
        describe_counter!(
            "festival_candidates_total",
            "Candidates admitted by the deduplicator."
        );
        describe_counter!(
            "festival_dedup_dropped_total",
            "Candidates dropped as duplicates."
        );
        describe_counter!(
            "festival_extraction_failures_total",
            "Detail pages fetched but dropped for lacking a title."
        );
        describe_counter!(
            "festival_source_failures_total",
            "Whole sources that timed out or panicked."
        );
        describe_histogram!("festival_collect_ms", "Orchestrator collect time in milliseconds.");
        describe_counter!(
            "festival_normalize_rejected_total",
            "Candidates rejected by the normalizer."
        );
        describe_counter!(
            "festival_fallback_generated_total",
            "Synthetic fallback records generated."
        );
        describe_counter!("festival_cache_hits_total", "Result cache hits.");
        describe_counter!("festival_cache_misses_total", "Result cache misses.");
        describe_counter!(
            "festival_persist_errors_total",
            "Document store writes that failed."
        );
        describe_gauge!("festival_cache_ttl_secs", "Configured result cache TTL.");
    });
}

/// Normalize scraped text: decode entities, strip tags, unify quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace (incl. nbsp)
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"[\s\u{00A0}]+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

const BOILERPLATE_EXACT: &[&str] = &[
    "home",
    "menu",
    "login",
    "log in",
    "sign in",
    "sign up",
    "register",
    "subscribe",
    "search",
    "events",
    "more",
    "read more",
    "learn more",
    "see all",
    "view all",
    "share",
    "next",
    "previous",
    "back",
    "close",
    "loading",
    "loading...",
];

const BOILERPLATE_CONTAINS: &[&str] = &[
    "skip to content",
    "skip to main",
    "cookie",
    "privacy policy",
    "terms of use",
    "terms and conditions",
    "all rights reserved",
    "enable javascript",
    "page not found",
    "access denied",
    "sign in to",
    "download the app",
    "you are being redirected",
];

/// Navigation / chrome text that never describes an event.
pub fn is_boilerplate(text: &str) -> bool {
    let t = text.trim().to_lowercase();
    if t.is_empty() {
        return true;
    }
    if BOILERPLATE_EXACT.contains(&t.as_str()) {
        return true;
    }
    BOILERPLATE_CONTAINS.iter().any(|p| t.contains(p))
}

/// URL path slug: lowercase ASCII alphanumerics joined by '-'.
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut dash = false;
    for ch in s.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Form-encode a value for use inside a URL query string.
pub fn encode_component(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.trim().as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_collapses_ws_and_tags() {
        let s = "  <b>Hello,&nbsp;&nbsp;</b> world!  ";
        assert_eq!(normalize_text(s), "Hello, world!");
    }

    #[test]
    fn boilerplate_matches_nav_phrases() {
        assert!(is_boilerplate("Sign In"));
        assert!(is_boilerplate("We use cookies to improve your experience"));
        assert!(!is_boilerplate("Mysore Dasara Festival"));
    }

    #[test]
    fn slugify_handles_spaces_and_punct() {
        assert_eq!(slugify(" New Delhi, India "), "new-delhi-india");
        assert_eq!(slugify("São Paulo"), "s-o-paulo");
    }

    #[test]
    fn encode_component_uses_plus_for_spaces() {
        assert_eq!(encode_component("music & food"), "music+%26+food");
    }
}
