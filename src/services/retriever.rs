//! Document retrieval: `retrieve(collection, query, k)` returning ranked chunks.
//!
//! Two adapters:
//!   - `HttpRetriever`: POSTs to an external vector-store service (RETRIEVER_URL)
//!   - `MemoryRetriever`: keyword-overlap ranking over documents seeded at startup
//!
//! An empty result is a valid answer, not an error.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Shared bank of past exam questions.
pub const EXAM_COLLECTION: &str = "exam_questions";

#[derive(Debug, Error)]
pub enum RetrievalError {
  #[error("retriever request failed: {0}")]
  Transport(String),
  #[error("retriever HTTP {0}")]
  Status(u16),
  #[error("malformed retriever response: {0}")]
  Decode(String),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DocMetadata {
  #[serde(default)]
  pub marks: Option<u32>,
  #[serde(default)]
  pub module: Option<String>,
  #[serde(default)]
  pub source_file: Option<String>,
  #[serde(default, deserialize_with = "string_or_number")]
  pub year: Option<String>,
  #[serde(default)]
  pub difficulty: Option<String>,
}

/// Years arrive as either `"2023"` or `2023`.
fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Raw {
    S(String),
    N(i64),
  }
  Ok(Option::<Raw>::deserialize(d)?.map(|r| match r {
    Raw::S(s) => s,
    Raw::N(n) => n.to_string(),
  }))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
  pub content: String,
  #[serde(default)]
  pub metadata: DocMetadata,
}

impl Document {
  pub fn new(content: impl Into<String>) -> Self {
    Self { content: content.into(), metadata: DocMetadata::default() }
  }

  pub fn with_metadata(mut self, metadata: DocMetadata) -> Self {
    self.metadata = metadata;
    self
  }
}

#[async_trait]
pub trait Retriever: Send + Sync {
  async fn retrieve(&self, collection: &str, query: &str, k: usize) -> Result<Vec<Document>, RetrievalError>;
}

#[derive(Clone)]
pub struct HttpRetriever {
  client: reqwest::Client,
  base_url: String,
}

#[derive(Serialize)]
struct QueryReq<'a> {
  collection: &'a str,
  query: &'a str,
  k: usize,
}

#[derive(Deserialize)]
struct QueryResp {
  #[serde(default)]
  documents: Vec<Document>,
}

impl HttpRetriever {
  pub fn new(base_url: &str) -> Result<Self, RetrievalError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(20))
      .build()
      .map_err(|e| RetrievalError::Transport(e.to_string()))?;
    Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
  }
}

#[async_trait]
impl Retriever for HttpRetriever {
  #[instrument(level = "debug", skip(self, query), fields(%collection, query_len = query.len(), k))]
  async fn retrieve(&self, collection: &str, query: &str, k: usize) -> Result<Vec<Document>, RetrievalError> {
    let url = format!("{}/query", self.base_url);
    let res = self.client.post(&url)
      .json(&QueryReq { collection, query, k })
      .send().await
      .map_err(|e| RetrievalError::Transport(e.to_string()))?;
    if !res.status().is_success() {
      return Err(RetrievalError::Status(res.status().as_u16()));
    }
    let body: QueryResp = res.json().await.map_err(|e| RetrievalError::Decode(e.to_string()))?;
    let mut docs = body.documents;
    docs.truncate(k);
    debug!(target: "edusynth_backend", %collection, hits = docs.len(), "Retrieved documents");
    Ok(docs)
  }
}

/// In-process store. Ranking is the count of distinct query terms present in the
/// document; ties keep insertion order. Documents sharing no term are not returned.
#[derive(Default)]
pub struct MemoryRetriever {
  collections: RwLock<HashMap<String, Vec<Document>>>,
}

fn terms(text: &str) -> HashSet<String> {
  text
    .split(|c: char| !c.is_alphanumeric())
    .filter(|t| t.chars().count() > 2)
    .map(str::to_lowercase)
    .collect()
}

impl MemoryRetriever {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn add(&self, collection: &str, doc: Document) {
    self.collections.write().await.entry(collection.to_string()).or_default().push(doc);
  }
}

#[async_trait]
impl Retriever for MemoryRetriever {
  async fn retrieve(&self, collection: &str, query: &str, k: usize) -> Result<Vec<Document>, RetrievalError> {
    let wanted = terms(query);
    let guard = self.collections.read().await;
    let Some(docs) = guard.get(collection) else { return Ok(Vec::new()) };

    let mut scored: Vec<(usize, usize, &Document)> = docs
      .iter()
      .enumerate()
      .filter_map(|(i, d)| {
        let have = terms(&d.content);
        let score = wanted.iter().filter(|t| have.contains(*t)).count();
        (score > 0).then_some((score, i, d))
      })
      .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    Ok(scored.into_iter().take(k).map(|(_, _, d)| d.clone()).collect())
  }
}
