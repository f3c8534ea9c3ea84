//! Web search used as supplementary context when a learner's own material is thin.
//! Backed by the DuckDuckGo instant-answer API. Failures yield an empty string.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{instrument, warn};

#[async_trait]
pub trait WebSearch: Send + Sync {
  /// Markdown bullet list of results; empty when nothing was found.
  async fn search(&self, query: &str, max_results: usize) -> String;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstantAnswer {
  #[serde(default)]
  pub heading: String,
  #[serde(default)]
  pub abstract_text: String,
  #[serde(default)]
  pub related_topics: Vec<RelatedTopic>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RelatedTopic {
  #[serde(default)]
  pub text: String,
  #[serde(default, rename = "FirstURL")]
  pub first_url: String,
  /// Category groups nest further topics.
  #[serde(default)]
  pub topics: Vec<RelatedTopic>,
}

/// Flatten an instant answer into at most `max` `- **title**: body` lines.
pub fn format_results(answer: &InstantAnswer, max: usize) -> String {
  let mut lines = Vec::new();
  if !answer.abstract_text.is_empty() {
    let title = if answer.heading.is_empty() { "Summary" } else { answer.heading.as_str() };
    lines.push(format!("- **{}**: {}", title, answer.abstract_text));
  }
  let flat = answer.related_topics.iter().flat_map(|t| {
    if t.topics.is_empty() { vec![t] } else { t.topics.iter().collect() }
  });
  for t in flat {
    if lines.len() >= max {
      break;
    }
    if t.text.is_empty() {
      continue;
    }
    // "Title - body" is the usual shape of a related-topic text
    let (title, body) = t.text.split_once(" - ").unwrap_or((t.first_url.as_str(), t.text.as_str()));
    lines.push(format!("- **{}**: {}", title, body));
  }
  lines.truncate(max);
  lines.join("\n")
}

#[derive(Clone)]
pub struct DuckDuckGoSearch {
  client: reqwest::Client,
  base_url: String,
}

impl DuckDuckGoSearch {
  pub fn new() -> Self {
    Self::with_base_url("https://api.duckduckgo.com")
  }

  pub fn with_base_url(base_url: &str) -> Self {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(10))
      .build()
      .unwrap_or_default();
    Self { client, base_url: base_url.trim_end_matches('/').to_string() }
  }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
  #[instrument(level = "info", skip(self), fields(query_len = query.len()))]
  async fn search(&self, query: &str, max_results: usize) -> String {
    let res = self.client
      .get(format!("{}/", self.base_url))
      .query(&[("q", query), ("format", "json"), ("no_html", "1"), ("skip_disambig", "1")])
      .send()
      .await;
    let answer = match res {
      Ok(r) if r.status().is_success() => r.json::<InstantAnswer>().await.unwrap_or_default(),
      Ok(r) => {
        warn!(target: "doubt", status = %r.status(), "Web search rejected");
        return String::new();
      }
      Err(e) => {
        warn!(target: "doubt", error = %e, "Web search failed");
        return String::new();
      }
    };
    format_results(&answer, max_results)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn formats_abstract_and_nested_topics() {
    let answer: InstantAnswer = serde_json::from_str(
      r#"{
        "Heading": "Osmosis",
        "AbstractText": "Movement of water across a membrane.",
        "RelatedTopics": [
          {"Text": "Diffusion - Net movement of particles", "FirstURL": "https://x/Diffusion"},
          {"Name": "Biology", "Topics": [
            {"Text": "Tonicity - Measure of osmotic pressure", "FirstURL": "https://x/Tonicity"}
          ]},
          {"Text": "", "FirstURL": "https://x/empty"}
        ]
      }"#,
    )
    .unwrap();
    let out = format_results(&answer, 5);
    assert_eq!(
      out,
      "- **Osmosis**: Movement of water across a membrane.\n\
       - **Diffusion**: Net movement of particles\n\
       - **Tonicity**: Measure of osmotic pressure"
    );
    assert_eq!(format_results(&answer, 1).lines().count(), 1);
  }

  #[test]
  fn empty_answer_is_empty_text() {
    assert_eq!(format_results(&InstantAnswer::default(), 5), "");
  }
}
