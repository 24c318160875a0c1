// src/fallback.rs
//! Deterministic synthetic festivals used to top up thin results.
//!
//! Same query, same output (apart from `fetched_at`). Categories are picked
//! by interest when any match, otherwise the whole library is cycled in its
//! fixed order.

use chrono::Utc;
use metrics::counter;
use tracing::info;

use crate::config::PipelineConfig;
use crate::ingest::slugify;
use crate::model::{truncate_chars, CanonicalEvent, Origin, LOCATION_MAX, TITLE_MAX};
use crate::query::Query;

struct Template {
    category: &'static str,
    title: &'static str,
    blurb: &'static str,
}

const LIBRARY: &[Template] = &[
    Template {
        category: "cultural",
        title: "{location} Cultural Festival",
        blurb: "folk dance, traditional costumes and evening performances from local communities",
    },
    Template {
        category: "music",
        title: "{location} Live Music Festival",
        blurb: "independent bands, classical recitals and open-air stages across the city",
    },
    Template {
        category: "food",
        title: "{location} Food Festival",
        blurb: "regional cuisine, street food stalls and chef-led tasting sessions",
    },
    Template {
        category: "art",
        title: "{location} Art Festival",
        blurb: "gallery walks, live painting and installations by local artists",
    },
    Template {
        category: "film",
        title: "{location} Film Festival",
        blurb: "independent screenings, short films and conversations with directors",
    },
    Template {
        category: "heritage",
        title: "{location} Heritage Festival",
        blurb: "guided heritage walks, storytelling and restored historic venues",
    },
    Template {
        category: "market",
        title: "{location} Artisan Market Festival",
        blurb: "handcrafted goods, flea market finds and small-batch producers",
    },
    Template {
        category: "wellness",
        title: "{location} Wellness Festival",
        blurb: "yoga sessions, meditation circles and mindful living workshops",
    },
    Template {
        category: "tech",
        title: "{location} Tech Festival",
        blurb: "startup showcases, maker demos and hands-on workshops",
    },
    Template {
        category: "sports",
        title: "{location} Sports Festival",
        blurb: "community runs, friendly tournaments and outdoor fitness events",
    },
];

/// (names, date range) per month. Matching is case-insensitive on the full
/// name or the usual abbreviations.
const MONTH_RANGES: &[(&[&str], &str)] = &[
    (&["january", "jan"], "January 10 to January 19"),
    (&["february", "feb"], "February 7 to February 16"),
    (&["march", "mar"], "March 7 to March 16"),
    (&["april", "apr"], "April 11 to April 20"),
    (&["may"], "May 9 to May 18"),
    (&["june", "jun"], "June 6 to June 15"),
    (&["july", "jul"], "July 11 to July 20"),
    (&["august", "aug"], "August 8 to August 17"),
    (&["september", "sep", "sept"], "September 12 to September 21"),
    (&["october", "oct"], "October 10 to October 19"),
    (&["november", "nov"], "November 7 to November 16"),
    (&["december", "dec"], "December 12 to December 21"),
];

pub const UNKNOWN_DATES: &str = "dates to be announced";

/// Static date range for a month name; `UNKNOWN_DATES` when not recognised.
pub fn month_date_range(month: &str) -> &'static str {
    let key = month
        .trim()
        .trim_end_matches('.')
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();
    MONTH_RANGES
        .iter()
        .find(|(names, _)| names.contains(&key.as_str()))
        .map(|(_, range)| *range)
        .unwrap_or(UNKNOWN_DATES)
}

#[derive(Debug, Clone, Copy)]
pub struct FallbackGenerator {
    min_results: usize,
    cap: usize,
}

impl FallbackGenerator {
    pub fn new(min_results: usize, cap: usize) -> Self {
        Self { min_results, cap }
    }

    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self::new(cfg.limits.min_results, cfg.limits.fallback_cap)
    }

    pub fn min_results(&self) -> usize {
        self.min_results
    }

    /// How many records `generate` would produce.
    pub fn shortfall(&self, already_have: usize) -> usize {
        self.min_results.saturating_sub(already_have).min(self.cap)
    }

    pub fn generate(&self, query: &Query, already_have: usize) -> Vec<CanonicalEvent> {
        let need = self.shortfall(already_have);
        if need == 0 {
            return Vec::new();
        }
        let pool = templates_for(query);
        let location = truncate_chars(query.location(), LOCATION_MAX);
        let loc_slug = slugify(query.location());
        let month_slug = slugify(query.month());
        let dates = month_date_range(query.month());

        let out: Vec<CanonicalEvent> = (0..need)
            .map(|i| {
                let t = pool[i % pool.len()];
                let round = i / pool.len();
                let mut title = t.title.replace("{location}", &location);
                let mut url = format!(
                    "https://allevents.in/{loc_slug}/{}-festival-{month_slug}",
                    t.category
                );
                if round > 0 {
                    title.push_str(&format!(" (Edition {})", round + 1));
                    url.push_str(&format!("-{}", round + 1));
                }
                let title = truncate_chars(&title, TITLE_MAX);
                let content = format!(
                    "{title} brings together {} in {location}. It runs {dates}, with most activities open to the public.",
                    t.blurb
                );
                CanonicalEvent {
                    id: None,
                    title,
                    location: location.clone(),
                    tags: vec![t.category.to_string(), "festival".to_string()],
                    source_url: url,
                    month: query.month().to_string(),
                    content,
                    fetched_at: Utc::now(),
                    origin: Origin::Fallback,
                }
            })
            .collect();

        counter!("festival_fallback_generated_total").increment(out.len() as u64);
        info!(target: "pipeline", generated = out.len(), already_have, "fallback records generated");
        out
    }
}

fn templates_for(query: &Query) -> Vec<&'static Template> {
    let interests = query.interests_lower();
    let matching: Vec<&Template> = LIBRARY
        .iter()
        .filter(|t| {
            interests
                .iter()
                .any(|i| t.category.contains(i.as_str()) || i.contains(t.category))
        })
        .collect();
    if matching.is_empty() {
        LIBRARY.iter().collect()
    } else {
        matching
    }
}
