// src/ingest/extractor.rs
//! Page → `CandidateEvent`.
//!
//! Order of trust:
//! 1. JSON-LD / microdata `Event` objects with a non-empty name.
//! 2. Ordered CSS probes per field (first text passing the length and
//!    boilerplate filters wins).
//! 3. No title → not extractable.
//!
//! Content never ends up empty: description → longest meaningful paragraph →
//! one templated sentence.

use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::ExtractionFailure;
use crate::ingest::types::{ListingItem, PageFetcher};
use crate::ingest::{is_boilerplate, normalize_text};
use crate::model::{
    truncate_chars, CandidateEvent, DATE_MAX, LOCATION_MAX, PRICE_MAX, RAW_CONTENT_MAX, TITLE_MAX,
    URL_MAX,
};
use crate::query::Query;

/// Where a field value is read from.
#[derive(Debug, Clone, Copy)]
enum Probe {
    Text(&'static str),
    Attr(&'static str, &'static str),
}

const TITLE_PROBES: &[Probe] = &[
    Probe::Text("h1.event-title"),
    Probe::Text(".event-title"),
    Probe::Text(".event-name"),
    Probe::Text("[class*='event-title']"),
    Probe::Text("h1"),
];

/// Tried after `TITLE_PROBES`; these usually carry a " | Site" suffix.
const PAGE_TITLE_PROBES: &[Probe] = &[
    Probe::Attr("meta[property='og:title']", "content"),
    Probe::Text("title"),
];

const DESCRIPTION_PROBES: &[Probe] = &[
    Probe::Text(".event-description"),
    Probe::Text(".event-details"),
    Probe::Text(".description"),
    Probe::Text("[class*='description']"),
    Probe::Text("[itemprop='description']"),
    Probe::Attr("meta[property='og:description']", "content"),
    Probe::Attr("meta[name='description']", "content"),
];

const DATE_PROBES: &[Probe] = &[
    Probe::Text(".event-date"),
    Probe::Attr("time[datetime]", "datetime"),
    Probe::Text("time"),
    Probe::Text(".date"),
    Probe::Text("[class*='date']"),
    Probe::Text("[class*='when']"),
];

const LOCATION_PROBES: &[Probe] = &[
    Probe::Text(".event-location"),
    Probe::Text(".event-venue"),
    Probe::Text(".venue"),
    Probe::Text(".location"),
    Probe::Text("[class*='location']"),
    Probe::Text("[class*='venue']"),
    Probe::Text("address"),
];

const PRICE_PROBES: &[Probe] = &[
    Probe::Text(".event-price"),
    Probe::Text(".ticket-price"),
    Probe::Text(".price"),
    Probe::Text("[class*='price']"),
];

const MIN_TITLE: usize = 4;
const MIN_DESCRIPTION: usize = 30;
const MIN_DATE: usize = 3;
const MIN_LOCATION: usize = 3;
const MIN_PRICE: usize = 1;
const MIN_PARAGRAPH: usize = 40;

pub struct Extractor {
    fetcher: Arc<dyn PageFetcher>,
    timeout: Duration,
}

impl Extractor {
    pub fn new(fetcher: Arc<dyn PageFetcher>, timeout: Duration) -> Self {
        Self { fetcher, timeout }
    }

    /// Fetch `url` and extract one candidate from it.
    pub async fn extract(
        &self,
        url: &str,
        source_name: &str,
        query: &Query,
    ) -> Result<CandidateEvent, ExtractionFailure> {
        let html = self.fetcher.fetch(url, self.timeout).await?;
        extract_from_html(&html, url, source_name, query).ok_or(ExtractionFailure::NoTitle)
    }

    /// Degraded candidate built from a listing card alone.
    pub fn from_listing(item: &ListingItem, source_name: &str, query: &Query) -> Option<CandidateEvent> {
        let title = normalize_text(&item.title);
        if title.chars().count() < MIN_TITLE || is_boilerplate(&title) {
            return None;
        }
        let card = normalize_text(&item.card_text);
        let content = if card.chars().count() > title.chars().count() + 10 {
            card
        } else {
            templated_content(&title, query.location())
        };
        Some(finish(Fields {
            title,
            content,
            location: None,
            date: None,
            price: None,
            url: item.link.clone(),
            source_name: source_name.to_string(),
            query,
        }))
    }
}

/// Pure extraction over an already fetched page.
pub fn extract_from_html(
    html: &str,
    url: &str,
    source_name: &str,
    query: &Query,
) -> Option<CandidateEvent> {
    let document = Html::parse_document(html);

    if let Some(ev) = structured_event(&document) {
        debug!(target: "extract", %url, "structured event data found");
        let title = ev.name;
        let content = ev
            .description
            .filter(|d| d.chars().count() >= MIN_DESCRIPTION)
            .or_else(|| longest_paragraph(&document))
            .unwrap_or_else(|| {
                templated_content(&title, ev.location.as_deref().unwrap_or(query.location()))
            });
        return Some(finish(Fields {
            title,
            content,
            location: ev.location,
            date: ev.date,
            price: ev.price,
            url: ev.url.unwrap_or_else(|| url.to_string()),
            source_name: source_name.to_string(),
            query,
        }));
    }

    let title = first_probe(&document, TITLE_PROBES, MIN_TITLE).or_else(|| {
        first_probe(&document, PAGE_TITLE_PROBES, MIN_TITLE).map(|t| strip_site_suffix(&t))
    })?;
    let location = first_probe(&document, LOCATION_PROBES, MIN_LOCATION);
    let content = first_probe(&document, DESCRIPTION_PROBES, MIN_DESCRIPTION)
        .or_else(|| longest_paragraph(&document))
        .unwrap_or_else(|| templated_content(&title, location.as_deref().unwrap_or(query.location())));

    Some(finish(Fields {
        title,
        content,
        location,
        date: first_probe(&document, DATE_PROBES, MIN_DATE),
        price: first_probe(&document, PRICE_PROBES, MIN_PRICE),
        url: url.to_string(),
        source_name: source_name.to_string(),
        query,
    }))
}

struct Fields<'q> {
    title: String,
    content: String,
    location: Option<String>,
    date: Option<String>,
    price: Option<String>,
    url: String,
    source_name: String,
    query: &'q Query,
}

/// Apply defaults and canonical length limits.
fn finish(f: Fields<'_>) -> CandidateEvent {
    let location = f
        .location
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| f.query.location().to_string());
    let date = f
        .date
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| f.query.month().to_string());
    let mut content = truncate_chars(&f.content, RAW_CONTENT_MAX);
    let title = truncate_chars(&f.title, TITLE_MAX);
    if content.is_empty() {
        content = templated_content(&title, &location);
    }
    CandidateEvent {
        title,
        raw_content: content,
        location_text: truncate_chars(&location, LOCATION_MAX),
        date_text: truncate_chars(&date, DATE_MAX),
        source_url: truncate_chars(&f.url, URL_MAX),
        source_name: f.source_name,
        price_text: f
            .price
            .map(|p| truncate_chars(&p, PRICE_MAX))
            .filter(|p| !p.is_empty()),
    }
}

pub fn templated_content(title: &str, location: &str) -> String {
    format!("{title} is a festival event taking place in {location}.")
}

fn first_probe(doc: &Html, probes: &[Probe], min_chars: usize) -> Option<String> {
    for probe in probes {
        let (sel_str, attr) = match *probe {
            Probe::Text(s) => (s, None),
            Probe::Attr(s, a) => (s, Some(a)),
        };
        let Ok(selector) = Selector::parse(sel_str) else {
            continue;
        };
        for el in doc.select(&selector) {
            let raw = match attr {
                Some(a) => el.value().attr(a).unwrap_or_default().to_string(),
                None => element_text(el),
            };
            let text = normalize_text(&raw);
            if text.chars().count() >= min_chars && !is_boilerplate(&text) {
                return Some(text);
            }
        }
    }
    None
}

fn element_text(el: ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ")
}

fn longest_paragraph(doc: &Html) -> Option<String> {
    static P: once_cell::sync::OnceCell<Selector> = once_cell::sync::OnceCell::new();
    let sel = P.get_or_init(|| Selector::parse("p").unwrap());
    doc.select(sel)
        .map(|p| normalize_text(&element_text(p)))
        .filter(|t| t.chars().count() >= MIN_PARAGRAPH && !is_boilerplate(t))
        .max_by_key(|t| t.chars().count())
}

/// "Dasara 2025 | Allevents" → "Dasara 2025"
fn strip_site_suffix(title: &str) -> String {
    for sep in [" | ", " - ", " :: "] {
        if let Some((head, _)) = title.split_once(sep) {
            if head.trim().chars().count() >= MIN_TITLE {
                return head.trim().to_string();
            }
        }
    }
    title.to_string()
}

// ------------------------------------------------------------
// Structured data (JSON-LD + microdata)
// ------------------------------------------------------------

#[derive(Debug, Default)]
struct StructuredEvent {
    name: String,
    description: Option<String>,
    date: Option<String>,
    location: Option<String>,
    price: Option<String>,
    url: Option<String>,
}

fn structured_event(doc: &Html) -> Option<StructuredEvent> {
    json_ld_event(doc).or_else(|| microdata_event(doc))
}

fn json_ld_event(doc: &Html) -> Option<StructuredEvent> {
    static LD: once_cell::sync::OnceCell<Selector> = once_cell::sync::OnceCell::new();
    let sel = LD.get_or_init(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());
    for script in doc.select(sel) {
        let body = script.text().collect::<String>();
        let Ok(value) = serde_json::from_str::<Value>(body.trim()) else {
            continue;
        };
        if let Some(obj) = find_event_object(&value) {
            return Some(event_from_json(obj));
        }
    }
    None
}

fn find_event_object(v: &Value) -> Option<&Map<String, Value>> {
    match v {
        Value::Array(items) => items.iter().find_map(find_event_object),
        Value::Object(map) => {
            if is_event_type(map.get("@type")) && json_str(map.get("name")).is_some() {
                return Some(map);
            }
            map.get("@graph").and_then(find_event_object)
        }
        _ => None,
    }
}

fn is_event_type(t: Option<&Value>) -> bool {
    match t {
        Some(Value::String(s)) => type_name_is_event(s),
        Some(Value::Array(a)) => a.iter().filter_map(Value::as_str).any(type_name_is_event),
        _ => false,
    }
}

/// "Event", "MusicEvent", "Festival", "https://schema.org/Event" ...
fn type_name_is_event(s: &str) -> bool {
    let last = s.rsplit('/').next().unwrap_or(s).trim();
    last.ends_with("Event") || last == "Festival"
}

fn json_str(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => {
            let t = normalize_text(s);
            (!t.is_empty()).then_some(t)
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Array(a) => a.iter().find_map(|x| json_str(Some(x))),
        _ => None,
    }
}

fn event_from_json(obj: &Map<String, Value>) -> StructuredEvent {
    let date = match (json_str(obj.get("startDate")), json_str(obj.get("endDate"))) {
        (Some(s), Some(e)) if s != e => Some(format!("{s} to {e}")),
        (Some(s), _) => Some(s),
        (None, e) => e,
    };
    StructuredEvent {
        name: json_str(obj.get("name")).unwrap_or_default(),
        description: json_str(obj.get("description")),
        date,
        location: obj.get("location").and_then(json_location),
        price: json_price(obj),
        url: json_str(obj.get("url")).filter(|u| u.starts_with("http")),
    }
}

fn json_location(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(normalize_text(s)).filter(|s| !s.is_empty()),
        Value::Array(a) => a.iter().find_map(json_location),
        Value::Object(m) => {
            let name = json_str(m.get("name"));
            let address = match m.get("address") {
                Some(Value::Object(a)) => {
                    let parts: Vec<String> = ["streetAddress", "addressLocality", "addressRegion"]
                        .iter()
                        .filter_map(|k| json_str(a.get(*k)))
                        .collect();
                    (!parts.is_empty()).then(|| parts.join(", "))
                }
                other => json_str(other),
            };
            match (name, address) {
                (Some(n), Some(a)) if !a.contains(&n) => Some(format!("{n}, {a}")),
                (Some(n), None) => Some(n),
                (_, Some(a)) => Some(a),
                (None, None) => None,
            }
        }
        _ => None,
    }
}

fn json_price(obj: &Map<String, Value>) -> Option<String> {
    if obj.get("isAccessibleForFree").and_then(Value::as_bool) == Some(true) {
        return Some("Free".to_string());
    }
    let offers = obj.get("offers")?;
    let offer = match offers {
        Value::Array(a) => a.first()?,
        other => other,
    };
    let m = offer.as_object()?;
    let price = json_str(m.get("price")).or_else(|| json_str(m.get("lowPrice")))?;
    Some(match json_str(m.get("priceCurrency")) {
        Some(cur) => format!("{price} {cur}"),
        None => price,
    })
}

fn microdata_event(doc: &Html) -> Option<StructuredEvent> {
    static SCOPE: once_cell::sync::OnceCell<Selector> = once_cell::sync::OnceCell::new();
    let sel = SCOPE.get_or_init(|| Selector::parse("[itemscope][itemtype]").unwrap());
    let scope = doc
        .select(sel)
        .find(|el| el.value().attr("itemtype").is_some_and(type_name_is_event))?;

    let name = itemprop(scope, "name")?;
    let date = match (itemprop(scope, "startDate"), itemprop(scope, "endDate")) {
        (Some(s), Some(e)) if s != e => Some(format!("{s} to {e}")),
        (Some(s), _) => Some(s),
        (None, e) => e,
    };
    Some(StructuredEvent {
        name,
        description: itemprop(scope, "description"),
        date,
        location: itemprop(scope, "location"),
        price: itemprop(scope, "price"),
        url: None,
    })
}

fn itemprop(scope: ElementRef, prop: &str) -> Option<String> {
    let selector = Selector::parse(&format!("[itemprop='{prop}']")).ok()?;
    let el = scope.select(&selector).next()?;
    let raw = el
        .value()
        .attr("content")
        .or_else(|| el.value().attr("datetime"))
        .map(str::to_string)
        .unwrap_or_else(|| element_text(el));
    let t = normalize_text(&raw);
    (!t.is_empty()).then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q() -> Query {
        Query::new("Bangalore", "October", Vec::<String>::new()).unwrap()
    }

    #[test]
    fn json_ld_in_graph_is_trusted() {
        let html = r#"<html><head>
<script type="application/ld+json">
{"@context":"https://schema.org","@graph":[
  {"@type":"WebPage","name":"ignored"},
  {"@type":["Thing","MusicEvent"],"name":"Bengaluru Jazz Night",
   "startDate":"2025-10-11","endDate":"2025-10-12",
   "location":{"@type":"Place","name":"Palace Grounds","address":{"addressLocality":"Bengaluru"}},
   "offers":[{"price":"499","priceCurrency":"INR"}]}
]}
</script></head>
<body><h1>Some other heading</h1>
<p>Two evenings of live jazz with local and touring bands across three stages.</p></body></html>"#;
        let c = extract_from_html(html, "https://e.example/jazz", "test", &q()).unwrap();
        assert_eq!(c.title, "Bengaluru Jazz Night");
        assert_eq!(c.date_text, "2025-10-11 to 2025-10-12");
        assert_eq!(c.location_text, "Palace Grounds, Bengaluru");
        assert_eq!(c.price_text.as_deref(), Some("499 INR"));
        assert!(c.raw_content.contains("live jazz"));
    }

    #[test]
    fn microdata_event_is_used() {
        let html = r#"<div itemscope itemtype="https://schema.org/Festival">
<span itemprop="name">Kadalekai Parishe</span>
<time itemprop="startDate" datetime="2025-11-17">Nov 17</time>
<span itemprop="location">Basavanagudi</span></div>"#;
        let c = extract_from_html(html, "https://e.example/kp", "test", &q()).unwrap();
        assert_eq!(c.title, "Kadalekai Parishe");
        assert_eq!(c.date_text, "2025-11-17");
        assert_eq!(c.location_text, "Basavanagudi");
        assert_eq!(
            c.raw_content,
            "Kadalekai Parishe is a festival event taking place in Basavanagudi."
        );
    }

    #[test]
    fn heuristics_skip_boilerplate_and_default_context() {
        let html = r#"<html><head><title>Food Carnival | CityGuide</title></head><body>
<div class="event-title">Menu</div>
<p>Short.</p>
<p>Street food stalls from every corner of the state, live cooking demos and evening music.</p>
</body></html>"#;
        let c = extract_from_html(html, "https://g.example/food", "guide", &q()).unwrap();
        assert_eq!(c.title, "Food Carnival");
        assert_eq!(c.location_text, "Bangalore");
        assert_eq!(c.date_text, "October");
        assert!(c.raw_content.starts_with("Street food stalls"));
        assert_eq!(c.price_text, None);
    }

    #[test]
    fn no_title_is_not_extractable() {
        let html = "<html><body><nav>Login</nav></body></html>";
        assert!(extract_from_html(html, "https://g.example/x", "guide", &q()).is_none());
    }

    #[test]
    fn long_fields_are_truncated() {
        let long_title = "Festival ".repeat(40);
        let html = format!("<h1>{long_title}</h1>");
        let c = extract_from_html(&html, "https://g.example/x", "guide", &q()).unwrap();
        assert!(c.title.chars().count() <= TITLE_MAX);
        assert!(!c.raw_content.is_empty());
    }

    #[test]
    fn listing_fallback_uses_card_text() {
        let item = ListingItem {
            title: "Bengaluru Habba".into(),
            link: "https://h.example/habba".into(),
            card_text: "Bengaluru Habba Dec 5-7 Music, theatre and dance across the city".into(),
        };
        let c = Extractor::from_listing(&item, "allevents", &q()).unwrap();
        assert_eq!(c.source_url, "https://h.example/habba");
        assert!(c.raw_content.contains("theatre"));
        assert_eq!(c.location_text, "Bangalore");
    }

    #[test]
    fn heading_titles_keep_their_separators() {
        let html = r#"<html><head><title>Kala Ghoda Arts Festival | Allevents</title></head>
<body><h1>Kala Ghoda - Arts Festival</h1></body></html>"#;
        let c = extract_from_html(html, "https://e.example/kg", "test", &q()).unwrap();
        assert_eq!(c.title, "Kala Ghoda - Arts Festival");
    }

    #[test]
    fn page_title_loses_site_suffix() {
        let html = r#"<html><head><title>Kala Ghoda Arts Festival | Allevents</title></head>
<body><div>no heading</div></body></html>"#;
        let c = extract_from_html(html, "https://e.example/kg", "test", &q()).unwrap();
        assert_eq!(c.title, "Kala Ghoda Arts Festival");
    }
}
