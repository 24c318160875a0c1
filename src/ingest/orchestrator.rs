// src/ingest/orchestrator.rs
//! Fan-out over all listing sources, fan-in through the deduplicator.
//!
//! Every source runs in its own task under its own timeout. Candidates are
//! merged as they arrive; once the cap is reached the receiver is dropped and
//! whatever is still in flight is discarded.

use metrics::{counter, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::ExtractionFailure;
use crate::ingest::dedup::Deduplicator;
use crate::ingest::ensure_metrics_described;
use crate::ingest::extractor::Extractor;
use crate::ingest::source_client::SourceClient;
use crate::ingest::types::{ListingSource, PageFetcher};
use crate::ingest::web_search::WebSearchSource;
use crate::model::CandidateEvent;
use crate::query::Query;

pub struct Orchestrator {
    sources: Vec<Arc<dyn ListingSource>>,
    extractor: Arc<Extractor>,
    cap: usize,
    source_timeout: Duration,
    max_pages_per_source: usize,
}

impl Orchestrator {
    pub fn new(
        sources: Vec<Arc<dyn ListingSource>>,
        extractor: Arc<Extractor>,
        cap: usize,
        source_timeout: Duration,
        max_pages_per_source: usize,
    ) -> Self {
        Self {
            sources,
            extractor,
            cap: cap.max(1),
            source_timeout,
            max_pages_per_source,
        }
    }

    /// Configured descriptors plus (if enabled) the web-search source.
    pub fn from_config(cfg: &PipelineConfig, fetcher: Arc<dyn PageFetcher>) -> Self {
        let mut sources: Vec<Arc<dyn ListingSource>> = cfg
            .sources
            .iter()
            .cloned()
            .map(|d| {
                Arc::new(SourceClient::new(
                    d,
                    fetcher.clone(),
                    cfg.fetch_timeout(),
                    cfg.template_delay(),
                )) as Arc<dyn ListingSource>
            })
            .collect();
        if cfg.web_search.enabled {
            sources.push(Arc::new(WebSearchSource::new(
                &cfg.web_search.endpoint,
                fetcher.clone(),
                cfg.fetch_timeout(),
            )));
        }
        let extractor = Arc::new(Extractor::new(fetcher, cfg.fetch_timeout()));
        Self::new(
            sources,
            extractor,
            cfg.limits.candidate_cap,
            cfg.source_timeout(),
            cfg.fetch.max_pages_per_source,
        )
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Collect up to `cap` unique candidates from all sources.
    pub async fn collect(&self, query: &Query) -> Vec<CandidateEvent> {
        ensure_metrics_described();
        let t0 = Instant::now();

        let (tx, mut rx) = mpsc::channel::<CandidateEvent>(self.cap * 2);
        let full = Arc::new(AtomicBool::new(false));
        let query = Arc::new(query.clone());

        let mut tasks = JoinSet::new();
        for source in &self.sources {
            let source = source.clone();
            let extractor = self.extractor.clone();
            let query = query.clone();
            let tx = tx.clone();
            let full = full.clone();
            let limit = self.source_timeout;
            let max_pages = self.max_pages_per_source;

            tasks.spawn(async move {
                let name = source.name().to_string();
                let run = run_source(source, extractor, query, tx, full, max_pages);
                match tokio::time::timeout(limit, run).await {
                    Ok(sent) => debug!(target: "sources", source = %name, sent, "source finished"),
                    Err(_) => {
                        warn!(target: "sources", source = %name, timeout_ms = limit.as_millis() as u64, "source timed out");
                        counter!("festival_source_failures_total").increment(1);
                    }
                }
            });
        }
        drop(tx);

        let mut dedup = Deduplicator::new();
        let mut out = Vec::with_capacity(self.cap);
        while let Some(candidate) = rx.recv().await {
            if !dedup.admit(&candidate) {
                counter!("festival_dedup_dropped_total").increment(1);
                continue;
            }
            out.push(candidate);
            counter!("festival_candidates_total").increment(1);
            if out.len() >= self.cap {
                full.store(true, Ordering::SeqCst);
                break;
            }
        }
        drop(rx);

        if full.load(Ordering::SeqCst) {
            // Let in-flight fetches finish on their own; their sends fail.
            tasks.detach_all();
        } else {
            while let Some(res) = tasks.join_next().await {
                if let Err(e) = res {
                    warn!(target: "sources", error = %e, "source task failed");
                    counter!("festival_source_failures_total").increment(1);
                }
            }
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("festival_collect_ms").record(ms);
        info!(
            target: "sources",
            kept = out.len(),
            dropped = dedup.dropped(),
            capped = full.load(Ordering::SeqCst),
            elapsed_ms = ms as u64,
            "collect finished"
        );
        out
    }
}

/// Listing → detail pages → candidates, streamed into `tx`. Returns the
/// number of candidates sent.
async fn run_source(
    source: Arc<dyn ListingSource>,
    extractor: Arc<Extractor>,
    query: Arc<Query>,
    tx: mpsc::Sender<CandidateEvent>,
    full: Arc<AtomicBool>,
    max_pages: usize,
) -> usize {
    let batch = source.fetch_listings(&query).await;
    let mut sent = 0usize;

    for item in batch.items.into_iter().take(max_pages) {
        if full.load(Ordering::SeqCst) || tx.is_closed() {
            break;
        }
        let candidate = match extractor.extract(&item.link, source.name(), &query).await {
            Ok(c) => Some(c),
            Err(ExtractionFailure::Fetch(error)) => {
                debug!(target: "extract", source = source.name(), link = %item.link, %error, "detail page unreachable; using listing card");
                Extractor::from_listing(&item, source.name(), &query)
            }
            Err(ExtractionFailure::NoTitle) => {
                debug!(target: "extract", source = source.name(), link = %item.link, "no title on detail page; dropped");
                counter!("festival_extraction_failures_total").increment(1);
                None
            }
        };
        let Some(candidate) = candidate else {
            continue;
        };
        if tx.send(candidate).await.is_err() {
            break;
        }
        sent += 1;
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceDescriptor;
    use crate::error::FetchError;
    use crate::ingest::fetch::StaticFetcher;
    use async_trait::async_trait;

    fn listing(n: usize, host: &str) -> String {
        let mut s = String::from("<ul>");
        for i in 0..n {
            s.push_str(&format!(
                r#"<li class="card"><a href="https://{host}/e/{i}?ref=list">{host} Festival Number {i}</a></li>"#
            ));
        }
        s.push_str("</ul>");
        s
    }

    fn descriptor(name: &str, url: &str) -> SourceDescriptor {
        SourceDescriptor {
            name: name.into(),
            url_templates: vec![url.into()],
            item_selectors: vec!["li.card".into()],
        }
    }

    fn orchestrator(fetcher: Arc<StaticFetcher>, descs: Vec<SourceDescriptor>, cap: usize) -> Orchestrator {
        let clients = descs.into_iter().map(|d| (d, Duration::ZERO)).collect();
        orchestrator_with(fetcher, clients, cap, Duration::from_secs(5))
    }

    fn orchestrator_with(
        fetcher: Arc<dyn PageFetcher>,
        clients: Vec<(SourceDescriptor, Duration)>,
        cap: usize,
        source_timeout: Duration,
    ) -> Orchestrator {
        let sources = clients
            .into_iter()
            .map(|(d, delay)| {
                Arc::new(SourceClient::new(d, fetcher.clone(), Duration::from_secs(1), delay))
                    as Arc<dyn ListingSource>
            })
            .collect();
        let extractor = Arc::new(Extractor::new(fetcher, Duration::from_secs(1)));
        Orchestrator::new(sources, extractor, cap, source_timeout, 50)
    }

    /// Never answers for `hang.test`; everything else comes from the pages map.
    struct HangingFetcher {
        pages: StaticFetcher,
    }

    #[async_trait]
    impl PageFetcher for HangingFetcher {
        async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
            if url.starts_with("https://hang.test/") {
                return std::future::pending().await;
            }
            self.pages.fetch(url, timeout).await
        }
    }

    #[tokio::test]
    async fn cap_is_enforced() {
        let fetcher = Arc::new(
            StaticFetcher::new()
                .with_page("https://a.test/list", &listing(20, "a.test"))
                .with_page("https://b.test/list", &listing(20, "b.test")),
        );
        let o = orchestrator(
            fetcher,
            vec![
                descriptor("a", "https://a.test/list"),
                descriptor("b", "https://b.test/list"),
            ],
            25,
        );
        let q = Query::new("Pune", "May", Vec::<String>::new()).unwrap();
        let out = o.collect(&q).await;
        assert_eq!(out.len(), 25);
    }

    #[tokio::test]
    async fn failing_source_does_not_empty_results() {
        let fetcher = Arc::new(StaticFetcher::new().with_page("https://a.test/list", &listing(3, "a.test")));
        let o = orchestrator(
            fetcher,
            vec![
                descriptor("down", "https://down.test/list"),
                descriptor("a", "https://a.test/list"),
            ],
            25,
        );
        let q = Query::new("Pune", "May", Vec::<String>::new()).unwrap();
        let out = o.collect(&q).await;
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|c| c.source_name == "a"));
    }

    #[tokio::test]
    async fn titleless_detail_page_is_dropped_not_degraded() {
        let list = r#"<ul>
<li class="card"><a href="https://a.test/e/login">Login required page here</a></li>
<li class="card"><a href="https://a.test/e/lantern">Lantern Walk Evening</a></li>
</ul>"#;
        let fetcher = Arc::new(
            StaticFetcher::new()
                .with_page("https://a.test/list", list)
                .with_page("https://a.test/e/login", "<html><body><nav>Login</nav></body></html>"),
        );
        let o = orchestrator(fetcher, vec![descriptor("a", "https://a.test/list")], 25);
        let q = Query::new("Pune", "May", Vec::<String>::new()).unwrap();
        let out = o.collect(&q).await;
        // the lantern page is missing (404), so only its card survives
        let titles: Vec<&str> = out.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Lantern Walk Evening"]);
    }

    #[tokio::test]
    async fn only_titleless_pages_yield_nothing() {
        let list = r#"<ul><li class="card"><a href="https://a.test/e/login">Login required page here</a></li></ul>"#;
        let fetcher = Arc::new(
            StaticFetcher::new()
                .with_page("https://a.test/list", list)
                .with_page("https://a.test/e/login", "<html><body><nav>Login</nav></body></html>"),
        );
        let o = orchestrator(fetcher, vec![descriptor("a", "https://a.test/list")], 25);
        let q = Query::new("Pune", "May", Vec::<String>::new()).unwrap();
        assert!(o.collect(&q).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_source_is_cut_off_at_its_timeout() {
        let fetcher = Arc::new(HangingFetcher {
            pages: StaticFetcher::new().with_page("https://a.test/list", &listing(3, "a.test")),
        });
        let o = orchestrator_with(
            fetcher,
            vec![
                (descriptor("stuck", "https://hang.test/list"), Duration::ZERO),
                (descriptor("a", "https://a.test/list"), Duration::ZERO),
            ],
            25,
            Duration::from_millis(300),
        );
        let q = Query::new("Pune", "May", Vec::<String>::new()).unwrap();

        let t0 = tokio::time::Instant::now();
        let out = o.collect(&q).await;
        let elapsed = t0.elapsed();

        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|c| c.source_name == "a"));
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn template_delay_only_slows_its_own_source() {
        let fetcher = Arc::new(
            StaticFetcher::new()
                .with_page("https://slow.test/list/2", &listing(3, "slow.test"))
                .with_page("https://fast.test/list", &listing(3, "fast.test")),
        );
        let slow = SourceDescriptor {
            name: "slow".into(),
            url_templates: vec![
                "https://slow.test/list/1".into(),
                "https://slow.test/list/2".into(),
            ],
            item_selectors: vec!["li.card".into()],
        };
        let q = Query::new("Pune", "May", Vec::<String>::new()).unwrap();

        // capped at the fast source's output: returns before the slow source wakes
        let o = orchestrator_with(
            fetcher.clone(),
            vec![
                (slow.clone(), Duration::from_secs(10)),
                (descriptor("fast", "https://fast.test/list"), Duration::ZERO),
            ],
            3,
            Duration::from_secs(30),
        );
        let t0 = tokio::time::Instant::now();
        let out = o.collect(&q).await;
        assert!(t0.elapsed() < Duration::from_secs(1), "took {:?}", t0.elapsed());
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|c| c.source_name == "fast"));

        // uncapped: the slow source still contributes once its delay has passed
        let o = orchestrator_with(
            fetcher,
            vec![
                (slow, Duration::from_secs(10)),
                (descriptor("fast", "https://fast.test/list"), Duration::ZERO),
            ],
            25,
            Duration::from_secs(30),
        );
        let t0 = tokio::time::Instant::now();
        let out = o.collect(&q).await;
        assert!(t0.elapsed() >= Duration::from_secs(10));
        assert_eq!(out.len(), 6);
        assert_eq!(out.iter().filter(|c| c.source_name == "slow").count(), 3);
    }
}
