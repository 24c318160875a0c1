// src/ingest/types.rs
use async_trait::async_trait;
use std::time::Duration;

use crate::error::FetchError;
use crate::query::Query;

/// Fetches one page body. Every call carries its own timeout.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError>;
}

/// One result card scraped from a listing/search page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingItem {
    pub title: String,
    /// Absolute URL of the detail page.
    pub link: String,
    pub card_text: String,
}

/// A listing template that could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFailure {
    pub url: String,
    pub error: FetchError,
}

/// Everything one source produced for a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingBatch {
    pub items: Vec<ListingItem>,
    pub failures: Vec<TemplateFailure>,
}

/// A source of listing items (configured site or web search).
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_listings(&self, query: &Query) -> ListingBatch;
    fn name(&self) -> &str;
}
