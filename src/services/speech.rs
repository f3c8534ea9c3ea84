//! Text-to-speech via Sarvam. Returns base64-encoded audio, or `None` when synthesis
//! is unavailable or fails. Callers treat `None` as a non-fatal miss.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::util::{clean_for_speech, trunc_for_log};

/// Sarvam's real-time endpoint is reliable up to roughly this many characters.
pub const MAX_SPEECH_CHARS: usize = 500;

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
  async fn synthesize(&self, text: &str, language_code: &str) -> Option<String>;
}

#[derive(Clone)]
pub struct SarvamSpeech {
  client: reqwest::Client,
  api_key: Option<String>,
  base_url: String,
  speaker: String,
}

#[derive(Serialize)]
struct TtsReq<'a> {
  text: &'a str,
  target_language_code: &'a str,
  speaker: &'a str,
  model: &'a str,
  enable_preprocessing: bool,
}

#[derive(Deserialize)]
struct TtsResp {
  #[serde(default)]
  audios: Vec<String>,
  #[serde(default)]
  audio: Option<String>,
}

impl SarvamSpeech {
  pub fn new(api_key: Option<String>, base_url: &str) -> Self {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(60))
      .build()
      .unwrap_or_default();
    Self {
      client,
      api_key,
      base_url: base_url.trim_end_matches('/').to_string(),
      speaker: "anushka".into(),
    }
  }

  pub fn is_configured(&self) -> bool {
    self.api_key.is_some()
  }
}

#[async_trait]
impl SpeechSynthesizer for SarvamSpeech {
  #[instrument(level = "info", skip(self, text), fields(text_len = text.len(), %language_code))]
  async fn synthesize(&self, text: &str, language_code: &str) -> Option<String> {
    let Some(key) = &self.api_key else {
      warn!(target: "edusynth_backend", "SARVAM_API_KEY not set; skipping speech synthesis");
      return None;
    };
    let clean = clean_for_speech(text, MAX_SPEECH_CHARS);
    if clean.is_empty() {
      return None;
    }

    let url = format!("{}/text-to-speech", self.base_url);
    let req = TtsReq {
      text: &clean,
      target_language_code: language_code,
      speaker: &self.speaker,
      model: "bulbul:v2",
      enable_preprocessing: true,
    };
    let res = match self.client.post(&url).header("api-subscription-key", key).json(&req).send().await {
      Ok(r) => r,
      Err(e) => {
        warn!(target: "edusynth_backend", error = %e, "Speech request failed");
        return None;
      }
    };
    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      warn!(target: "edusynth_backend", %status, body = %trunc_for_log(&body, 200), "Speech synthesis rejected");
      return None;
    }
    let body: TtsResp = match res.json().await {
      Ok(b) => b,
      Err(e) => {
        warn!(target: "edusynth_backend", error = %e, "Malformed speech response");
        return None;
      }
    };
    let audio = body.audios.into_iter().next().or(body.audio).filter(|a| !a.is_empty());
    if let Some(a) = &audio {
      info!(target: "edusynth_backend", chars = clean.chars().count(), audio_b64_len = a.len(), "Speech synthesized");
    }
    audio
  }
}
