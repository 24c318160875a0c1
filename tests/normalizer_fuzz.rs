// tests/normalizer_fuzz.rs
//
// Randomized model answers (seeded): whatever comes back, an accepted record
// never has more than 5 tags, a title over 100 chars, or empty content, and
// its month is the query month.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::{json, Value};

use festival_discovery::analyze::ai_adapter::AiClient;
use festival_discovery::analyze::normalizer::Normalizer;
use festival_discovery::error::Rejection;
use festival_discovery::model::{CONTENT_MAX, TAGS_MAX, TITLE_MAX};
use festival_discovery::{CandidateEvent, Query};

/// Replays a fixed list of answers, one per call.
struct Scripted {
    answers: Mutex<Vec<Option<String>>>,
}

impl AiClient for Scripted {
    fn complete<'a>(
        &'a self,
        _system: &'a str,
        _user: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        let next = self.answers.lock().unwrap().pop().flatten();
        Box::pin(async move { next })
    }
    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

const WORDS: &[&str] = &[
    "festival", "Diwali", "lights", "मेला", "🎉", "   ", "...", "!!", "music", "#food",
    "\n", "<b>bold</b>", "&amp;", "```", "REJECT", "{", "}", "\"", "night", "parade",
];

fn words(rng: &mut StdRng, n: usize) -> String {
    (0..n)
        .map(|_| WORDS[rng.random_range(0..WORDS.len())])
        .collect::<Vec<_>>()
        .join(" ")
}

fn random_value(rng: &mut StdRng) -> Value {
    match rng.random_range(0..6) {
        0 => Value::Null,
        1 => json!(rng.random_range(-5..500)),
        2 => {
            let n = rng.random_range(0..4);
            json!(words(rng, n))
        }
        3 => {
            let n = rng.random_range(20..120);
            json!(words(rng, n))
        }
        4 => {
            let n = rng.random_range(0..12);
            Value::Array((0..n).map(|_| json!(words(rng, 2))).collect())
        }
        _ => json!({ "nested": words(rng, 3) }),
    }
}

/// First half of `body`, cut on a char boundary.
fn cut_in_half(body: &str) -> String {
    let mut cut = body.len() / 2;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    body[..cut].to_string()
}

fn random_answer(rng: &mut StdRng) -> Option<String> {
    match rng.random_range(0..11) {
        0 => None,
        1 => Some(words(rng, 8)),
        2 => Some("{\"reject\": true}".into()),
        3 => {
            let content_len = rng.random_range(5..80);
            let body = json!({
                "title": "Jaipur Literature Festival",
                "location": "Jaipur",
                "tags": ["books", "festival"],
                "sourceURL": "https://jlf.example/e",
                "month": "January",
                "content": words(rng, content_len),
            })
            .to_string();
            Some(cut_in_half(&body))
        }
        _ => {
            let mut obj = serde_json::Map::new();
            for key in ["title", "location", "tags", "sourceURL", "month", "content"] {
                if rng.random_bool(0.85) {
                    obj.insert(key.into(), random_value(rng));
                }
            }
            if rng.random_bool(0.5) {
                let title_len = rng.random_range(1..60);
                let content_len = rng.random_range(1..300);
                obj.insert("title".into(), json!(words(rng, title_len)));
                obj.insert("location".into(), json!("Jaipur"));
                obj.insert("content".into(), json!(words(rng, content_len)));
            }
            let body = Value::Object(obj).to_string();
            Some(if rng.random_bool(0.5) {
                format!("```json\n{body}\n```")
            } else {
                body
            })
        }
    }
}

fn candidate(i: usize) -> CandidateEvent {
    CandidateEvent {
        title: format!("Jaipur Literature Festival {i}"),
        raw_content: "Authors and readers gather at Diggi Palace. Sessions run all day.".into(),
        location_text: "Diggi Palace, Jaipur".into(),
        date_text: "January".into(),
        source_url: format!("https://jlf.example/e/{i}"),
        source_name: "fuzz".into(),
        price_text: None,
    }
}

#[tokio::test]
async fn fuzzed_answers_never_break_canonical_shape() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let n = 400;
    let answers: Vec<Option<String>> = (0..n).map(|_| random_answer(&mut rng)).collect();
    let client = Arc::new(Scripted {
        answers: Mutex::new(answers),
    });
    let normalizer = Normalizer::new(client, Duration::ZERO, 4);
    let query = Query::new("Jaipur", "January", ["books"]).unwrap();

    let candidates: Vec<CandidateEvent> = (0..n).map(candidate).collect();
    let out = normalizer.normalize_all(candidates, &query).await;

    assert!(!out.is_empty());
    for ev in &out {
        assert!(ev.tags.len() <= TAGS_MAX, "tags: {:?}", ev.tags);
        assert!(ev.title.chars().count() <= TITLE_MAX);
        assert!(!ev.title.trim().is_empty());
        assert!(!ev.content.trim().is_empty());
        assert!(ev.content.chars().count() <= CONTENT_MAX);
        assert_eq!(ev.month, "January");
        assert!(ev.is_well_formed());
    }
}

#[tokio::test]
async fn answer_cut_mid_string_is_rejected() {
    let body = json!({
        "title": "Jaipur Literature Festival",
        "location": "Jaipur",
        "tags": ["books"],
        "sourceURL": "https://jlf.example/e/0",
        "month": "January",
        "content": "Authors and readers gather at Diggi Palace. Sessions run all day."
    })
    .to_string();
    let client = Arc::new(Scripted {
        answers: Mutex::new(vec![Some(cut_in_half(&body))]),
    });
    let normalizer = Normalizer::new(client, Duration::ZERO, 1);
    let query = Query::new("Jaipur", "January", ["books"]).unwrap();

    let err = normalizer.normalize(&candidate(0), &query).await.unwrap_err();
    assert!(matches!(err, Rejection::Malformed(_)), "{err:?}");
}
