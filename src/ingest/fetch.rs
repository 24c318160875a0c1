//! HTTP page fetching.
//!
//! `HttpFetcher` is the production implementation; `StaticFetcher` serves
//! pages from memory for offline runs and tests, counting every call.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use crate::error::FetchError;
use crate::ingest::types::PageFetcher;

/// reqwest-backed fetcher with a browser-like header set.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static("en-US,en;q=0.5"),
        );

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(5))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let parsed = url::Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        let timeout_ms = timeout.as_millis() as u64;
        let call = async {
            let resp = self
                .client
                .get(parsed)
                .send()
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::Status(status.as_u16()));
            }
            resp.text()
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))
        };

        match tokio::time::timeout(timeout, call).await {
            Ok(res) => res,
            Err(_) => Err(FetchError::Timeout(timeout_ms)),
        }
    }
}

/// In-memory fetcher: serves registered pages, 404 for anything else.
#[derive(Default)]
pub struct StaticFetcher {
    pages: RwLock<HashMap<String, String>>,
    calls: AtomicUsize,
    offline: AtomicBool,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.insert(url, html);
        self
    }

    pub fn insert(&self, url: &str, html: &str) {
        let mut g = match self.pages.write() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        g.insert(url.to_string(), html.to_string());
    }

    /// Every subsequent fetch fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of fetch calls made so far (including failed ones).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Transport("offline".to_string()));
        }
        let g = match self.pages.read() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        g.get(url).cloned().ok_or(FetchError::Status(404))
    }
}
