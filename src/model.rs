//! Event records flowing through the pipeline.
//!
//! `CandidateEvent` is what extraction produces from a page; it never leaves the
//! process. `CanonicalEvent` is the normalized record that gets persisted,
//! cached and returned to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical field limits (in chars).
pub const TITLE_MAX: usize = 100;
pub const LOCATION_MAX: usize = 120;
pub const DATE_MAX: usize = 80;
pub const PRICE_MAX: usize = 60;
pub const CONTENT_MAX: usize = 1200;
pub const RAW_CONTENT_MAX: usize = 2000;
pub const URL_MAX: usize = 500;
pub const TAG_MAX: usize = 32;
pub const TAGS_MAX: usize = 5;

/// Where a canonical record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Scraped,
    Fallback,
}

/// Raw event candidate produced by the extractor (ephemeral).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateEvent {
    pub title: String,
    pub raw_content: String,
    pub location_text: String,
    pub date_text: String,
    pub source_url: String,
    pub source_name: String,
    pub price_text: Option<String>,
}

/// Normalized, persisted festival record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    /// Assigned by the document store on insert; `None` before persistence
    /// or when persistence failed.
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub location: String,
    pub tags: Vec<String>,
    #[serde(rename = "sourceURL")]
    pub source_url: String,
    pub month: String,
    pub content: String,
    pub fetched_at: DateTime<Utc>,
    pub origin: Origin,
}

impl CanonicalEvent {
    /// True when the record satisfies the canonical shape invariants.
    pub fn is_well_formed(&self) -> bool {
        !self.title.trim().is_empty()
            && self.title.chars().count() <= TITLE_MAX
            && !self.content.trim().is_empty()
            && self.tags.len() <= TAGS_MAX
    }
}

/// Truncate to at most `max` chars, trimming trailing whitespace.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.trim().to_string();
    }
    let cut: String = s.chars().take(max).collect();
    cut.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "Diwali Utsav — ದೀಪಾವಳಿ celebration";
        let out = truncate_chars(s, 15);
        assert!(out.chars().count() <= 15);
        assert!(s.starts_with(&out));
    }

    #[test]
    fn origin_serializes_lowercase() {
        let v = serde_json::to_string(&Origin::Fallback).unwrap();
        assert_eq!(v, "\"fallback\"");
    }
}
