//! Stock footage from Pexels: search, pick one file, download it to disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument, warn};

#[async_trait]
pub trait FootageSource: Send + Sync {
  /// Download one clip matching `query` to `dest`. `None` when nothing usable was found.
  async fn search_and_download(&self, query: &str, dest: &Path) -> Option<PathBuf>;
}

#[derive(Clone, Debug, Deserialize)]
pub struct VideoFile {
  #[serde(default)]
  pub quality: Option<String>,
  #[serde(default)]
  pub width: Option<u32>,
  pub link: String,
}

#[derive(Deserialize)]
struct SearchResp {
  #[serde(default)]
  videos: Vec<Video>,
}

#[derive(Deserialize)]
struct Video {
  #[serde(default)]
  video_files: Vec<VideoFile>,
}

/// First HD file at least 1280 wide, else the first file.
pub fn pick_file(files: &[VideoFile]) -> Option<&VideoFile> {
  files
    .iter()
    .find(|f| f.quality.as_deref() == Some("hd") && f.width.unwrap_or(0) >= 1280)
    .or_else(|| files.first())
}

#[derive(Clone)]
pub struct PexelsFootage {
  client: reqwest::Client,
  api_key: Option<String>,
  base_url: String,
}

impl PexelsFootage {
  pub fn new(api_key: Option<String>) -> Self {
    Self::with_base_url(api_key, "https://api.pexels.com")
  }

  pub fn with_base_url(api_key: Option<String>, base_url: &str) -> Self {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(60))
      .build()
      .unwrap_or_default();
    Self { client, api_key, base_url: base_url.trim_end_matches('/').to_string() }
  }

  async fn find_link(&self, key: &str, query: &str) -> Option<String> {
    let res = self.client
      .get(format!("{}/videos/search", self.base_url))
      .header("Authorization", key)
      .query(&[("query", query), ("per_page", "5"), ("orientation", "landscape")])
      .send().await
      .map_err(|e| warn!(target: "video", error = %e, "Pexels search failed"))
      .ok()?;
    if !res.status().is_success() {
      warn!(target: "video", status = %res.status(), "Pexels search rejected");
      return None;
    }
    let body: SearchResp = res.json().await.ok()?;
    let first = body.videos.into_iter().next()?;
    pick_file(&first.video_files).map(|f| f.link.clone())
  }
}

#[async_trait]
impl FootageSource for PexelsFootage {
  #[instrument(level = "info", skip(self, dest), fields(%query))]
  async fn search_and_download(&self, query: &str, dest: &Path) -> Option<PathBuf> {
    let Some(key) = &self.api_key else {
      warn!(target: "video", "PEXELS_API_KEY not set; scene will use a placeholder");
      return None;
    };
    let Some(link) = self.find_link(key, query).await else {
      warn!(target: "video", %query, "No stock footage found");
      return None;
    };
    let res = self.client.get(&link).send().await.ok()?;
    if !res.status().is_success() {
      warn!(target: "video", status = %res.status(), "Footage download rejected");
      return None;
    }
    let bytes = res.bytes().await.ok()?;
    if let Err(e) = tokio::fs::write(dest, &bytes).await {
      warn!(target: "video", error = %e, path = %dest.display(), "Could not store footage");
      return None;
    }
    info!(target: "video", path = %dest.display(), bytes = bytes.len(), "Footage downloaded");
    Some(dest.to_path_buf())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn file(quality: &str, width: u32, link: &str) -> VideoFile {
    VideoFile { quality: Some(quality.into()), width: Some(width), link: link.into() }
  }

  #[test]
  fn prefers_wide_hd_file() {
    let files = vec![file("sd", 640, "sd"), file("hd", 960, "narrow"), file("hd", 1920, "wide")];
    assert_eq!(pick_file(&files).unwrap().link, "wide");
  }

  #[test]
  fn falls_back_to_first_file() {
    let files = vec![file("sd", 640, "sd"), file("hd", 1024, "small-hd")];
    assert_eq!(pick_file(&files).unwrap().link, "sd");
    assert!(pick_file(&[]).is_none());
  }
}
