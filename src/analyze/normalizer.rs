// src/analyze/normalizer.rs
//! Candidate → canonical record.
//!
//! The model is asked for a fixed JSON object (title, location, tags,
//! sourceURL, month, content) or an explicit reject. Its answer is parsed into
//! [`AiEvent`] and then conformed: required fields present, lengths clamped,
//! content shaped to 2–4 sentences, month forced to the query month.
//!
//! When the model gives no answer at all (disabled, unreachable, daily limit)
//! the candidate is conformed locally instead of being dropped.

use chrono::Utc;
use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::analyze::ai_adapter::DynAiClient;
use crate::analyze::gate::IntervalGate;
use crate::config::PipelineConfig;
use crate::error::Rejection;
use crate::ingest::extractor::templated_content;
use crate::ingest::{ensure_metrics_described, normalize_text};
use crate::model::{
    truncate_chars, CandidateEvent, CanonicalEvent, Origin, CONTENT_MAX, LOCATION_MAX,
    RAW_CONTENT_MAX, TAGS_MAX, TAG_MAX, TITLE_MAX, URL_MAX,
};
use crate::query::Query;

pub const SYSTEM_PROMPT: &str = "You clean up scraped festival listings. \
Reply with ONE JSON object and nothing else: \
{\"title\": string, \"location\": string, \"tags\": [string, at most 5], \
\"sourceURL\": string, \"month\": string, \"content\": string of 2 to 4 sentences}. \
Use the query month verbatim. If the listing is not a festival or event in the \
requested place and month, reply with {\"reject\": true}.";

const MIN_SENTENCES: usize = 2;
const MAX_SENTENCES: usize = 4;
/// Per-sentence cap so four sentences always fit in `CONTENT_MAX`.
const SENTENCE_MAX: usize = CONTENT_MAX / MAX_SENTENCES - 1;

/// Keyword → tag table used when tags have to be inferred locally.
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("music", &["music", "concert", "band", "dj ", "gig", "singer"]),
    ("food", &["food", "cuisine", "culinary", "street food", "beer", "wine"]),
    ("art", &["art ", "arts", "gallery", "exhibition", "craft", "painting"]),
    ("film", &["film", "cinema", "movie", "screening"]),
    ("heritage", &["heritage", "history", "historic", "temple", "fort", "palace"]),
    (
        "cultural",
        &["culture", "cultural", "dance", "traditional", "diwali", "dasara", "navratri", "holi"],
    ),
    ("market", &["market", "bazaar", "mela", "flea"]),
    ("wellness", &["yoga", "wellness", "meditation", "retreat"]),
    ("tech", &["tech", "startup", "hackathon", "developer"]),
    ("sports", &["marathon", "sports", "cricket", "cycling", "race"]),
];

/// Model answer, validated field by field in [`conform`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AiEvent {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Option<Value>,
    #[serde(default, rename = "sourceURL", alias = "sourceUrl", alias = "source_url")]
    pub source_url: Option<String>,
    #[serde(default)]
    pub month: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Clone)]
pub struct Normalizer {
    client: DynAiClient,
    gate: Arc<IntervalGate>,
    workers: usize,
}

impl Normalizer {
    pub fn new(client: DynAiClient, interval: Duration, workers: usize) -> Self {
        Self {
            client,
            gate: Arc::new(IntervalGate::new(interval)),
            workers: workers.max(1),
        }
    }

    pub fn from_config(cfg: &PipelineConfig, client: DynAiClient) -> Self {
        Self::new(client, cfg.normalize_interval(), cfg.normalize.workers)
    }

    pub fn provider_name(&self) -> &'static str {
        self.client.provider_name()
    }

    /// One candidate. Never panics; a bad answer is a `Rejection`.
    pub async fn normalize(
        &self,
        candidate: &CandidateEvent,
        query: &Query,
    ) -> Result<CanonicalEvent, Rejection> {
        match self.ask_model(candidate, query).await {
            Err(Rejection::Unavailable) => {
                debug!(target: "normalize", title = %candidate.title, "model unavailable; conforming locally");
                conform_locally(candidate, query)
            }
            other => other,
        }
    }

    async fn ask_model(
        &self,
        candidate: &CandidateEvent,
        query: &Query,
    ) -> Result<CanonicalEvent, Rejection> {
        // the gate paces upstream calls only
        if !self.client.is_enabled() {
            return Err(Rejection::Unavailable);
        }
        let user = request_payload(candidate, query);
        self.gate.wait().await;
        let answer = self
            .client
            .complete(SYSTEM_PROMPT, &user)
            .await
            .ok_or(Rejection::Unavailable)?;
        let parsed = parse_response(&answer)?;
        conform(parsed, candidate, query)
    }

    /// Normalize a batch on the bounded worker pool. Rejected candidates are
    /// dropped; accepted ones keep input order.
    pub async fn normalize_all(
        &self,
        candidates: Vec<CandidateEvent>,
        query: &Query,
    ) -> Vec<CanonicalEvent> {
        ensure_metrics_described();
        let results = self.run_pool(candidates.clone(), query).await;

        let mut out = Vec::with_capacity(results.len());
        for (candidate, result) in candidates.iter().zip(results) {
            match result {
                Ok(event) => out.push(event),
                Err(reason) => {
                    info!(target: "normalize", title = %candidate.title, source = %candidate.source_name, %reason, "candidate rejected");
                    counter!("festival_normalize_rejected_total").increment(1);
                }
            }
        }
        out
    }

    /// Shape pass for fallback records. A record the model rejects is kept
    /// as generated, so the count never shrinks.
    pub async fn normalize_fallback(
        &self,
        records: Vec<CanonicalEvent>,
        query: &Query,
    ) -> Vec<CanonicalEvent> {
        let candidates: Vec<CandidateEvent> = records.iter().map(as_candidate).collect();
        let results = self.run_pool(candidates, query).await;

        records
            .into_iter()
            .zip(results)
            .map(|(template, result)| match result {
                Ok(mut event) => {
                    event.origin = Origin::Fallback;
                    event
                }
                Err(reason) => {
                    debug!(target: "normalize", title = %template.title, %reason, "fallback kept in template shape");
                    template
                }
            })
            .collect()
    }

    /// Results in input order.
    async fn run_pool(
        &self,
        candidates: Vec<CandidateEvent>,
        query: &Query,
    ) -> Vec<Result<CanonicalEvent, Rejection>> {
        let n = candidates.len();
        let permits = Arc::new(Semaphore::new(self.workers));
        let query = Arc::new(query.clone());
        let mut tasks = JoinSet::new();

        for (idx, candidate) in candidates.into_iter().enumerate() {
            let this = self.clone();
            let permits = permits.clone();
            let query = query.clone();
            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => this.normalize(&candidate, &query).await,
                    Err(_) => Err(Rejection::Unavailable),
                };
                (idx, result)
            });
        }

        let mut slots: Vec<Option<Result<CanonicalEvent, Rejection>>> = (0..n).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => debug!(target: "normalize", error = %e, "normalize task failed"),
            }
        }
        slots
            .into_iter()
            .map(|s| s.unwrap_or_else(|| Err(Rejection::Malformed("task failed".into()))))
            .collect()
    }
}

/// User message sent to the model (and understood by the echo mock).
pub fn request_payload(candidate: &CandidateEvent, query: &Query) -> String {
    json!({
        "query": {
            "location": query.location(),
            "month": query.month(),
            "interests": query.interests_lower(),
        },
        "candidate": {
            "title": candidate.title,
            "content": truncate_chars(&candidate.raw_content, RAW_CONTENT_MAX),
            "location": candidate.location_text,
            "date": candidate.date_text,
            "sourceURL": candidate.source_url,
            "source": candidate.source_name,
            "price": candidate.price_text,
        }
    })
    .to_string()
}

/// Strip code fences, detect reject signals, parse the JSON object.
pub fn parse_response(raw: &str) -> Result<AiEvent, Rejection> {
    let text = strip_code_fences(raw);
    if text.is_empty() {
        return Err(Rejection::Malformed("empty answer".into()));
    }
    if text
        .split_whitespace()
        .next()
        .is_some_and(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).eq_ignore_ascii_case("reject"))
    {
        return Err(Rejection::Declined);
    }

    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Err(Rejection::Malformed("no JSON object".into()));
    };
    if end < start {
        return Err(Rejection::Malformed("no JSON object".into()));
    }
    let value: Value = serde_json::from_str(&text[start..=end])
        .map_err(|e| Rejection::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(Rejection::Malformed("not an object".into()));
    }
    if is_reject_signal(&value) {
        return Err(Rejection::Declined);
    }
    serde_json::from_value(value).map_err(|e| Rejection::Malformed(e.to_string()))
}

fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // drop the language tag line
        text = match rest.find('\n') {
            Some(i) => &rest[i + 1..],
            None => rest,
        };
        text = text.trim_end();
        if let Some(inner) = text.strip_suffix("```") {
            text = inner;
        }
    }
    text.trim()
}

fn is_reject_signal(v: &Value) -> bool {
    if v.get("reject").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    if v.get("valid").and_then(Value::as_bool) == Some(false) {
        return true;
    }
    matches!(
        v.get("status").and_then(Value::as_str).map(str::to_ascii_lowercase).as_deref(),
        Some("reject" | "rejected")
    )
}

/// Validate the model answer and enforce canonical field limits.
pub fn conform(
    ai: AiEvent,
    candidate: &CandidateEvent,
    query: &Query,
) -> Result<CanonicalEvent, Rejection> {
    let title = required(ai.title.as_deref(), "title")?;
    let title = truncate_chars(&title, TITLE_MAX);
    let location = truncate_chars(&required(ai.location.as_deref(), "location")?, LOCATION_MAX);
    let content = required(ai.content.as_deref(), "content")?;
    let content = shape_content(&content, &title, &location).ok_or(Rejection::MissingField("content"))?;

    let source_url = ai
        .source_url
        .as_deref()
        .map(str::trim)
        .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
        .unwrap_or(&candidate.source_url);

    Ok(CanonicalEvent {
        id: None,
        title,
        location,
        tags: clean_tags(ai.tags.as_ref()),
        source_url: truncate_chars(source_url, URL_MAX),
        month: query.month().to_string(),
        content,
        fetched_at: Utc::now(),
        origin: Origin::Scraped,
    })
}

/// Conform without the model: fields straight from the candidate, tags
/// inferred from interests and category keywords.
pub fn conform_locally(candidate: &CandidateEvent, query: &Query) -> Result<CanonicalEvent, Rejection> {
    let title = truncate_chars(&required(Some(candidate.title.as_str()), "title")?, TITLE_MAX);
    let location = {
        let loc = normalize_text(&candidate.location_text);
        if loc.is_empty() {
            query.location().to_string()
        } else {
            truncate_chars(&loc, LOCATION_MAX)
        }
    };
    let content = shape_content(&normalize_text(&candidate.raw_content), &title, &location)
        .or_else(|| shape_content(&templated_content(&title, &location), &title, &location))
        .ok_or(Rejection::MissingField("content"))?;
    let tags = infer_tags(&format!("{title} {content}"), query);

    Ok(CanonicalEvent {
        id: None,
        title,
        location,
        tags,
        source_url: truncate_chars(&candidate.source_url, URL_MAX),
        month: query.month().to_string(),
        content,
        fetched_at: Utc::now(),
        origin: Origin::Scraped,
    })
}

fn required(v: Option<&str>, field: &'static str) -> Result<String, Rejection> {
    let s = normalize_text(v.unwrap_or_default());
    if s.chars().any(char::is_alphanumeric) {
        Ok(s)
    } else {
        Err(Rejection::MissingField(field))
    }
}

/// 2–4 sentences, each clamped; a lone sentence gets a context sentence
/// appended. `None` when nothing readable is left.
pub fn shape_content(text: &str, title: &str, location: &str) -> Option<String> {
    let mut sentences: Vec<String> = split_sentences(text)
        .into_iter()
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .take(MAX_SENTENCES)
        .map(|s| clamp_sentence(&s))
        .collect();
    if sentences.is_empty() {
        return None;
    }
    if sentences.len() < MIN_SENTENCES {
        sentences.push(clamp_sentence(&format!("{title} takes place in {location}.")));
    }
    Some(truncate_chars(&sentences.join(" "), CONTENT_MAX))
}

fn split_sentences(text: &str) -> Vec<String> {
    static RE_SENT: OnceCell<Regex> = OnceCell::new();
    let re = RE_SENT.get_or_init(|| Regex::new(r"[^.!?]+(?:[.!?]+|$)").unwrap());
    re.find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn clamp_sentence(s: &str) -> String {
    let mut out = truncate_chars(s, SENTENCE_MAX - 1);
    if !out.ends_with(['.', '!', '?']) {
        out.push('.');
    }
    out
}

/// Lowercase, strip `#`, dedupe, at most `TAGS_MAX`. Accepts an array or a
/// comma-separated string; anything else yields no tags.
pub fn clean_tags(raw: Option<&Value>) -> Vec<String> {
    let items: Vec<String> = match raw {
        Some(Value::Array(xs)) => xs.iter().filter_map(|x| x.as_str().map(str::to_string)).collect(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let tag = normalize_text(&item)
            .trim_start_matches('#')
            .trim()
            .to_lowercase();
        let tag = truncate_chars(&tag, TAG_MAX);
        if tag.is_empty() || out.contains(&tag) {
            continue;
        }
        out.push(tag);
        if out.len() == TAGS_MAX {
            break;
        }
    }
    out
}

/// Interests mentioned in the text, then keyword categories; "festival"
/// when nothing matches.
pub fn infer_tags(text: &str, query: &Query) -> Vec<String> {
    let hay = format!(" {} ", text.to_lowercase());
    let mut tags: Vec<String> = Vec::new();
    for interest in query.interests_lower() {
        if hay.contains(&interest) {
            push_tag(&mut tags, &interest);
        }
    }
    for (tag, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|k| hay.contains(k)) {
            push_tag(&mut tags, tag);
        }
    }
    if tags.is_empty() {
        tags.push("festival".to_string());
    }
    tags
}

fn push_tag(tags: &mut Vec<String>, tag: &str) {
    let tag = truncate_chars(tag, TAG_MAX);
    if !tag.is_empty() && !tags.contains(&tag) && tags.len() < TAGS_MAX {
        tags.push(tag);
    }
}

fn as_candidate(event: &CanonicalEvent) -> CandidateEvent {
    CandidateEvent {
        title: event.title.clone(),
        raw_content: event.content.clone(),
        location_text: event.location.clone(),
        date_text: event.month.clone(),
        source_url: event.source_url.clone(),
        source_name: "fallback".to_string(),
        price_text: None,
    }
}
