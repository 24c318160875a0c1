// tests/dedup_scenarios.rs
//
// Duplicate handling across sources within one orchestrator run.

use std::sync::Arc;
use std::time::Duration;

use festival_discovery::config::SourceDescriptor;
use festival_discovery::ingest::dedup::Deduplicator;
use festival_discovery::ingest::extractor::Extractor;
use festival_discovery::ingest::fetch::StaticFetcher;
use festival_discovery::ingest::orchestrator::Orchestrator;
use festival_discovery::ingest::source_client::SourceClient;
use festival_discovery::ingest::types::ListingSource;
use festival_discovery::{CandidateEvent, Query};

fn candidate(title: &str, url: &str) -> CandidateEvent {
    CandidateEvent {
        title: title.into(),
        raw_content: "Beach carnival with parades.".into(),
        location_text: "Goa".into(),
        date_text: "February".into(),
        source_url: url.into(),
        source_name: "t".into(),
        price_text: None,
    }
}

#[test]
fn tracking_params_do_not_make_a_new_event() {
    let mut d = Deduplicator::new();
    assert!(d.admit(&candidate("Goa Carnival", "https://x.com/e/1?ref=fb")));
    assert!(!d.admit(&candidate("Goa Carnival Parade", "https://x.com/e/1?ref=tw")));
    assert_eq!(d.admitted(), 1);
    assert_eq!(d.dropped(), 1);
}

fn listing(href: &str, label: &str) -> String {
    format!(r#"<ul><li class="card"><a href="{href}">{label}</a></li></ul>"#)
}

fn source(name: &str, url: &str, fetcher: Arc<StaticFetcher>) -> Arc<dyn ListingSource> {
    Arc::new(SourceClient::new(
        SourceDescriptor {
            name: name.into(),
            url_templates: vec![url.into()],
            item_selectors: vec!["li.card".into()],
        },
        fetcher,
        Duration::from_secs(1),
        Duration::ZERO,
    ))
}

#[tokio::test]
async fn same_event_from_two_sources_is_admitted_once() {
    let fetcher = Arc::new(
        StaticFetcher::new()
            .with_page("https://a.test/list", &listing("https://x.com/e/1?ref=fb", "Goa Carnival"))
            .with_page("https://b.test/list", &listing("http://www.x.com/e/1/?ref=tw", "Goa Carnival 2025")),
    );
    let orchestrator = Orchestrator::new(
        vec![
            source("a", "https://a.test/list", fetcher.clone()),
            source("b", "https://b.test/list", fetcher.clone()),
        ],
        Arc::new(Extractor::new(fetcher, Duration::from_secs(1))),
        25,
        Duration::from_secs(5),
        10,
    );
    let q = Query::new("Goa", "February", Vec::<String>::new()).unwrap();
    let out = orchestrator.collect(&q).await;
    assert_eq!(out.len(), 1);
}
