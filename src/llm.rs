//! Chat-completions client for an OpenAI-compatible endpoint (Groq by default).
//!
//! We only call chat.completions and only ask for plain text; structured payloads are
//! pulled out of the text by `extract`. Calls are instrumented and log model names,
//! latencies and response sizes (not contents). API keys are never logged.
//!
//! Credentials come from a pool. `with_rotation` retries one logical call, moving to
//! the next key when the failure looks like a rate limit or an auth problem; any
//! other failure aborts at once.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::LlmSettings;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
  #[error("no model credentials configured")]
  NotConfigured,
  #[error("rate limited: {0}")]
  RateLimited(String),
  #[error("unauthorized: {0}")]
  Unauthorized(String),
  #[error("model HTTP {status}: {message}")]
  Http { status: u16, message: String },
  #[error("transport error: {0}")]
  Transport(String),
  #[error("model returned an empty completion")]
  Empty,
}

impl LlmError {
  /// Map a non-success response onto the error taxonomy.
  pub fn from_status(status: u16, message: String) -> Self {
    let lower = message.to_lowercase();
    if status == 429 || lower.contains("rate_limit") {
      LlmError::RateLimited(message)
    } else if status == 401 || lower.contains("invalid_api_key") {
      LlmError::Unauthorized(message)
    } else {
      LlmError::Http { status, message }
    }
  }
}

/// Which model class a stage wants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
  Fast,
  Smart,
  Best,
}

impl ModelTier {
  pub fn as_str(self) -> &'static str {
    match self {
      ModelTier::Fast => "fast",
      ModelTier::Smart => "smart",
      ModelTier::Best => "best",
    }
  }
}

/// The model-call seam every stage depends on.
#[async_trait]
pub trait LanguageModel: Send + Sync {
  async fn invoke(&self, system: &str, user: &str, tier: ModelTier) -> Result<String, LlmError>;
}

/// Round-robin pool of API keys.
#[derive(Debug, Default)]
pub struct KeyPool {
  keys: Vec<String>,
  cursor: AtomicUsize,
}

impl KeyPool {
  pub fn new(keys: Vec<String>) -> Self {
    Self { keys, cursor: AtomicUsize::new(0) }
  }

  /// Accepts comma, semicolon or newline separated keys.
  pub fn parse(raw: &str) -> Self {
    let keys = raw
      .split(|c| c == ',' || c == ';' || c == '\n')
      .map(str::trim)
      .filter(|k| !k.is_empty())
      .map(str::to_string)
      .collect();
    Self::new(keys)
  }

  pub fn len(&self) -> usize {
    self.keys.len()
  }

  pub fn is_empty(&self) -> bool {
    self.keys.is_empty()
  }

  pub fn current(&self) -> Option<&str> {
    if self.keys.is_empty() {
      return None;
    }
    let i = self.cursor.load(Ordering::Relaxed) % self.keys.len();
    Some(self.keys[i].as_str())
  }

  pub fn rotate(&self) {
    self.cursor.fetch_add(1, Ordering::Relaxed);
  }
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub rate_limit_delay: Duration,
  pub auth_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      rate_limit_delay: Duration::from_secs(1),
      auth_delay: Duration::from_millis(500),
    }
  }
}

impl RetryPolicy {
  /// `None` means the error is not worth another attempt.
  fn delay_for(&self, err: &LlmError) -> Option<Duration> {
    match err {
      LlmError::RateLimited(_) => Some(self.rate_limit_delay),
      LlmError::Unauthorized(_) => Some(self.auth_delay),
      _ => None,
    }
  }
}

/// Run `call` with the pool's current key, rotating on rate-limit / auth failures.
pub async fn with_rotation<T, F, Fut>(pool: &KeyPool, policy: &RetryPolicy, mut call: F) -> Result<T, LlmError>
where
  F: FnMut(String) -> Fut,
  Fut: Future<Output = Result<T, LlmError>>,
{
  let attempts = policy.max_attempts.max(1);
  let mut last = LlmError::NotConfigured;
  for attempt in 1..=attempts {
    let key = pool.current().ok_or(LlmError::NotConfigured)?.to_string();
    match call(key).await {
      Ok(v) => return Ok(v),
      Err(e) => {
        let Some(delay) = policy.delay_for(&e) else { return Err(e) };
        warn!(target: "edusynth_backend", attempt, attempts, pool = pool.len(), error = %e, "Model call failed; rotating key");
        pool.rotate();
        last = e;
        if attempt < attempts {
          tokio::time::sleep(delay).await;
        }
      }
    }
  }
  Err(last)
}

#[derive(Clone)]
pub struct ChatClient {
  client: reqwest::Client,
  keys: Arc<KeyPool>,
  policy: RetryPolicy,
  pub base_url: String,
  pub fast_model: String,
  pub smart_model: String,
  pub best_model: String,
}

impl ChatClient {
  /// Build the client if at least one key is configured; otherwise return None.
  pub fn from_settings(cfg: &LlmSettings) -> Option<Self> {
    let keys = KeyPool::parse(&cfg.api_keys);
    if keys.is_empty() {
      return None;
    }
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(cfg.timeout_secs))
      .build()
      .ok()?;
    Some(Self {
      client,
      keys: Arc::new(keys),
      policy: RetryPolicy { max_attempts: cfg.max_attempts, ..RetryPolicy::default() },
      base_url: cfg.base_url.trim_end_matches('/').to_string(),
      fast_model: cfg.fast_model.clone(),
      smart_model: cfg.smart_model.clone(),
      best_model: cfg.best_model.clone(),
    })
  }

  pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn key_count(&self) -> usize {
    self.keys.len()
  }

  fn model_for(&self, tier: ModelTier) -> &str {
    match tier {
      ModelTier::Fast => &self.fast_model,
      ModelTier::Smart => &self.smart_model,
      ModelTier::Best => &self.best_model,
    }
  }

  /// One HTTP round trip with a specific key.
  async fn chat_once(&self, key: &str, model: &str, system: &str, user: &str) -> Result<String, LlmError> {
    let url = format!("{}/chat/completions", self.base_url);
    let mut messages = Vec::with_capacity(2);
    if !system.is_empty() {
      messages.push(ChatMessageReq { role: "system".into(), content: system.into() });
    }
    messages.push(ChatMessageReq { role: "user".into(), content: user.into() });
    let req = ChatCompletionRequest {
      model: model.to_string(),
      messages,
      temperature: 0.7,
      max_tokens: None,
    };

    let res = self.client.post(&url)
      .header(USER_AGENT, "edusynth-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", key))
      .json(&req).send().await.map_err(|e| LlmError::Transport(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_api_error(&body).unwrap_or(body);
      return Err(LlmError::from_status(status, msg));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| LlmError::Transport(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(target: "edusynth_backend", prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "Model usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default().trim().to_string();
    if text.is_empty() {
      return Err(LlmError::Empty);
    }
    Ok(text)
  }
}

#[async_trait]
impl LanguageModel for ChatClient {
  #[instrument(level = "info", skip(self, system, user), fields(tier = tier.as_str(), system_len = system.len(), user_len = user.len()))]
  async fn invoke(&self, system: &str, user: &str, tier: ModelTier) -> Result<String, LlmError> {
    let model = self.model_for(tier).to_string();
    let start = Instant::now();
    let result = with_rotation(&self.keys, &self.policy, |key| {
      let model = model.clone();
      async move { self.chat_once(&key, &model, system, user).await }
    })
    .await;
    let elapsed = start.elapsed();
    match &result {
      Ok(text) => info!(target: "edusynth_backend", %model, ?elapsed, response_len = text.len(), "Model response received"),
      Err(e) => warn!(target: "edusynth_backend", %model, ?elapsed, error = %e, "Model call failed"),
    }
    result
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Pull `error.message` (and `error.type`/`code` when present) out of an error body.
fn extract_api_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj {
    message: String,
    #[serde(default, rename = "type")] kind: Option<String>,
    #[serde(default)] code: Option<String>,
  }
  let w = serde_json::from_str::<EWrap>(body).ok()?;
  let tag = w.error.code.or(w.error.kind);
  Some(match tag {
    Some(t) => format!("{} ({})", w.error.message, t),
    None => w.error.message,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::Mutex;
  use wiremock::matchers::{header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn instant() -> RetryPolicy {
    RetryPolicy { max_attempts: 3, rate_limit_delay: Duration::ZERO, auth_delay: Duration::ZERO }
  }

  #[test]
  fn key_pool_parses_mixed_separators() {
    let pool = KeyPool::parse("k1, k2;k3\n\n k4 ,");
    assert_eq!(pool.len(), 4);
    assert_eq!(pool.current(), Some("k1"));
    pool.rotate();
    assert_eq!(pool.current(), Some("k2"));
    for _ in 0..3 { pool.rotate(); }
    assert_eq!(pool.current(), Some("k1"));
  }

  #[test]
  fn status_classification() {
    assert!(matches!(LlmError::from_status(429, "slow down".into()), LlmError::RateLimited(_)));
    assert!(matches!(LlmError::from_status(400, "rate_limit_exceeded".into()), LlmError::RateLimited(_)));
    assert!(matches!(LlmError::from_status(401, "bad".into()), LlmError::Unauthorized(_)));
    assert!(matches!(LlmError::from_status(403, "invalid_api_key".into()), LlmError::Unauthorized(_)));
    assert!(matches!(LlmError::from_status(500, "boom".into()), LlmError::Http { status: 500, .. }));
  }

  #[tokio::test]
  async fn rotation_moves_to_next_key_on_rate_limit() {
    let pool = KeyPool::parse("a,b,c");
    let seen = Mutex::new(Vec::new());
    let out = with_rotation(&pool, &instant(), |key| {
      seen.lock().unwrap().push(key.clone());
      async move {
        if key == "a" { Err(LlmError::RateLimited("429".into())) } else { Ok(key) }
      }
    })
    .await;
    assert_eq!(out, Ok("b".to_string()));
    assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
  }

  #[tokio::test]
  async fn other_errors_abort_without_retry() {
    let pool = KeyPool::parse("a,b");
    let calls = AtomicUsize::new(0);
    let out: Result<(), _> = with_rotation(&pool, &instant(), |_key| {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Err(LlmError::Http { status: 400, message: "bad request".into() }) }
    })
    .await;
    assert!(matches!(out, Err(LlmError::Http { status: 400, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn attempts_are_bounded() {
    let pool = KeyPool::parse("a,b");
    let calls = AtomicUsize::new(0);
    let out: Result<(), _> = with_rotation(&pool, &instant(), |_key| {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Err(LlmError::Unauthorized("invalid_api_key".into())) }
    })
    .await;
    assert!(matches!(out, Err(LlmError::Unauthorized(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn empty_pool_is_not_configured() {
    let out: Result<(), _> = with_rotation(&KeyPool::default(), &instant(), |_k| async { Ok(()) }).await;
    assert_eq!(out, Err(LlmError::NotConfigured));
  }

  fn settings(base_url: String, keys: &str) -> LlmSettings {
    LlmSettings { base_url, api_keys: keys.into(), ..LlmSettings::default() }
  }

  #[tokio::test]
  async fn client_rotates_key_after_429() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/chat/completions"))
      .and(header("authorization", "Bearer first"))
      .respond_with(ResponseTemplate::new(429).set_body_json(json!({
        "error": {"message": "Rate limit reached", "type": "tokens", "code": "rate_limit_exceeded"}
      })))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/chat/completions"))
      .and(header("authorization", "Bearer second"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"content": "  Light reactions, Calvin cycle  "}}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
      })))
      .expect(1)
      .mount(&server)
      .await;

    let client = ChatClient::from_settings(&settings(server.uri(), "first,second"))
      .unwrap()
      .with_policy(instant());
    let text = client.invoke("sys", "user", ModelTier::Fast).await.unwrap();
    assert_eq!(text, "Light reactions, Calvin cycle");
  }

  #[tokio::test]
  async fn client_surfaces_permanent_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/chat/completions"))
      .respond_with(ResponseTemplate::new(400).set_body_json(json!({
        "error": {"message": "model not found"}
      })))
      .expect(1)
      .mount(&server)
      .await;

    let client = ChatClient::from_settings(&settings(server.uri(), "only")).unwrap().with_policy(instant());
    let err = client.invoke("sys", "user", ModelTier::Smart).await.unwrap_err();
    assert_eq!(err, LlmError::Http { status: 400, message: "model not found".into() });
  }

  #[test]
  fn no_keys_means_no_client() {
    assert!(ChatClient::from_settings(&settings("http://localhost".into(), " , ")).is_none());
  }
}
