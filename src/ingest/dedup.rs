// src/ingest/dedup.rs
//! Per-run duplicate filter.
//!
//! Two keys: the canonical URL (host without `www.`, path without trailing
//! slash, no query/fragment/scheme) and the lowercased title paired with the
//! location text. A `Deduplicator` lives for one orchestrator run only.

use std::collections::HashSet;
use url::Url;

use crate::model::CandidateEvent;

/// Canonical form of a URL for duplicate detection.
pub fn canonicalize_url(raw: &str) -> String {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(u) if u.host_str().is_some() => {
            let host = u.host_str().unwrap_or_default().to_ascii_lowercase();
            let host = host.strip_prefix("www.").unwrap_or(&host);
            let port = u.port().map(|p| format!(":{p}")).unwrap_or_default();
            let path = u.path().trim_end_matches('/');
            format!("{host}{port}{path}")
        }
        _ => raw.trim_end_matches('/').to_lowercase(),
    }
}

fn title_key(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Default)]
pub struct Deduplicator {
    seen_urls: HashSet<String>,
    seen_titles: HashSet<(String, String)>,
    dropped: usize,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` → first time seen (and now recorded); `false` → duplicate.
    pub fn admit(&mut self, candidate: &CandidateEvent) -> bool {
        let url = canonicalize_url(&candidate.source_url);
        let title = (
            title_key(&candidate.title),
            title_key(&candidate.location_text),
        );

        if self.seen_urls.contains(&url) || self.seen_titles.contains(&title) {
            self.dropped += 1;
            return false;
        }
        self.seen_urls.insert(url);
        self.seen_titles.insert(title);
        true
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn admitted(&self) -> usize {
        self.seen_urls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(title: &str, url: &str, loc: &str) -> CandidateEvent {
        CandidateEvent {
            title: title.into(),
            raw_content: "x".into(),
            location_text: loc.into(),
            date_text: "October".into(),
            source_url: url.into(),
            source_name: "t".into(),
            price_text: None,
        }
    }

    #[test]
    fn canonical_url_drops_query_fragment_www_and_slash() {
        assert_eq!(
            canonicalize_url("https://WWW.X.com/e/1/?ref=fb#top"),
            "x.com/e/1"
        );
        assert_eq!(canonicalize_url("http://x.com/e/1"), "x.com/e/1");
        assert_eq!(canonicalize_url("http://x.com:8080/e"), "x.com:8080/e");
        assert_eq!(canonicalize_url(" not a url/ "), "not a url");
    }

    #[test]
    fn same_title_different_location_is_kept() {
        let mut d = Deduplicator::new();
        assert!(d.admit(&cand("Diwali Mela", "https://a.test/1", "Pune")));
        assert!(d.admit(&cand("Diwali Mela", "https://a.test/2", "Mumbai")));
        assert!(!d.admit(&cand("diwali  MELA", "https://b.test/9", "pune")));
        assert_eq!(d.dropped(), 1);
        assert_eq!(d.admitted(), 2);
    }
}
