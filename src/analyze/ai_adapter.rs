//! AI adapter: provider abstraction + daily limit.
//!
//! Clients return the raw model text (or `None` when no answer could be
//! obtained). Interpreting the text is the normalizer's job.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::ai::AiConfig;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// Trait object used by the normalizer (and tests).
pub trait AiClient: Send + Sync {
    /// Send a system + user message pair; `None` means "no answer".
    fn complete<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
    /// False when `complete` can never reach an upstream model.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Convenient alias used by callers.
pub type DynAiClient = Arc<dyn AiClient>;

/// Factory: build a client according to config and environment variables.
///
/// * If `AI_TEST_MODE=mock`, returns the deterministic echo client.
/// * Else if `config.enabled==false`, returns a disabled client.
/// * Else builds the real provider (OpenAI) wrapped with the daily limit.
pub fn build_client_from_config(config: &AiConfig) -> DynAiClient {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(LimitedClient::new(EchoProvider, config.daily_limit));
    }

    if !config.enabled {
        return Arc::new(DisabledClient);
    }

    match config.provider.as_str() {
        "openai" => match OpenAiProvider::new(&config.api_key, &config.model) {
            Some(provider) => Arc::new(LimitedClient::new(provider, config.daily_limit)),
            None => Arc::new(DisabledClient),
        },
        _ => Arc::new(DisabledClient),
    }
}

// ------------------------------------------------------------
// Provider abstraction + concrete providers
// ------------------------------------------------------------

/// Low-level provider: does the actual call. Separated so the same limit
/// wrapper serves production and tests.
pub trait Provider: Send + Sync + 'static {
    fn fetch<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;
    fn name(&self) -> &'static str;
}

/// OpenAI provider (Chat Completions API).
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    /// `None` when the key is empty or the HTTP client cannot be built.
    pub fn new(api_key: &str, model: &str) -> Option<Self> {
        if api_key.trim().is_empty() {
            return None;
        }
        let http = reqwest::Client::builder()
            .user_agent("festival-discovery/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(30))
            .build()
            .ok()?;
        Some(Self {
            http,
            api_key: api_key.trim().to_string(),
            model: model.to_string(),
        })
    }
}

impl Provider for OpenAiProvider {
    fn fetch<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move {
            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                max_tokens: u32,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                content: Option<String>,
            }

            let req = Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: system,
                    },
                    Msg {
                        role: "user",
                        content: user,
                    },
                ],
                temperature: 0.2,
                max_tokens: 600,
            };

            let resp = match self
                .http
                .post("https://api.openai.com/v1/chat/completions")
                .bearer_auth(&self.api_key)
                .json(&req)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(target: "normalize", error = %e, "openai request failed");
                    return None;
                }
            };

            if !resp.status().is_success() {
                tracing::warn!(target: "normalize", status = %resp.status(), "openai non-success status");
                return None;
            }
            let body: Resp = resp.json().await.ok()?;
            body.choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .filter(|s| !s.trim().is_empty())
        })
    }
    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Returns `None` always; used when AI is disabled.
pub struct DisabledClient;

impl AiClient for DisabledClient {
    fn complete<'a>(
        &'a self,
        _system: &'a str,
        _user: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async { None })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
    fn is_enabled(&self) -> bool {
        false
    }
}

/// Deterministic mock: reads the normalizer's request payload
/// (`{"query": {...}, "candidate": {...}}`) and answers with the candidate
/// re-shaped into the response schema.
#[derive(Clone, Copy, Default)]
pub struct EchoProvider;

impl EchoProvider {
    pub fn answer(user: &str) -> Option<String> {
        let v: Value = serde_json::from_str(user).ok()?;
        let c = v.get("candidate")?;
        let q = v.get("query")?;
        let mut tags: Vec<Value> = q
            .get("interests")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if tags.is_empty() {
            tags.push(Value::String("festival".to_string()));
        }
        let out = json!({
            "title": c.get("title")?,
            "location": c.get("location")?,
            "tags": tags,
            "sourceURL": c.get("sourceURL")?,
            "month": q.get("month")?,
            "content": c.get("content")?,
        });
        Some(format!("```json\n{out}\n```"))
    }
}

impl Provider for EchoProvider {
    fn fetch<'a>(
        &'a self,
        _system: &'a str,
        user: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        let out = Self::answer(user);
        Box::pin(async move { out })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Daily limit wrapper
// ------------------------------------------------------------

/// Counter state is guarded by a `Mutex` to keep it simple and safe.
pub struct LimitedClient<P: Provider> {
    inner: P,
    daily_limit_max: u32,
    counter: Arc<Mutex<DailyCounter>>,
}

impl<P: Provider> LimitedClient<P> {
    pub fn new(inner: P, daily_limit_max: u32) -> Self {
        Self {
            inner,
            daily_limit_max,
            counter: Arc::new(Mutex::new(DailyCounter::default())),
        }
    }

    /// Calls made today (answered or not).
    pub fn calls_today(&self) -> u32 {
        match self.counter.lock() {
            Ok(g) => g.count,
            Err(poison) => poison.into_inner().count,
        }
    }

    async fn complete_impl(&self, system: &str, user: &str) -> Option<String> {
        {
            let mut g = match self.counter.lock() {
                Ok(g) => g,
                Err(poison) => poison.into_inner(),
            };
            if g.is_expired() {
                g.reset_to_today();
            }
            if g.count >= self.daily_limit_max {
                tracing::info!(target: "normalize", limit = self.daily_limit_max, "daily AI limit reached");
                return None;
            }
            g.count = g.count.saturating_add(1);
        }
        self.inner.fetch(system, user).await
    }
}

impl<P: Provider> AiClient for LimitedClient<P> {
    fn complete<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(self.complete_impl(system, user))
    }
    fn provider_name(&self) -> &'static str {
        self.inner.name()
    }
}

#[derive(Debug, Clone)]
struct DailyCounter {
    day: u64,
    count: u32,
}

impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            day: today(),
            count: 0,
        }
    }
}

impl DailyCounter {
    fn is_expired(&self) -> bool {
        self.day != today()
    }
    fn reset_to_today(&mut self) {
        self.day = today();
        self.count = 0;
    }
}

/// Days since UNIX epoch.
fn today() -> u64 {
    (chrono::Utc::now().timestamp().max(0) as u64) / 86_400
}
