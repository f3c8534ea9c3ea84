//! Deterministic intent + spoken-language detection for tutor queries.
//!
//! Both are ordered rule tables: the first matching category / language wins.
//! Reproducibility beats recall here, so no scoring and no fuzzy matching.

use serde::{Deserialize, Serialize};

/// What the learner asked the tutor to produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
  /// Mermaid mindmap / concept diagram.
  Diagram,
  Flashcards,
  Quiz,
  Audio,
  Video,
  #[default]
  Explain,
}

impl Intent {
  pub fn as_str(self) -> &'static str {
    match self {
      Intent::Diagram => "diagram",
      Intent::Flashcards => "flashcards",
      Intent::Quiz => "quiz",
      Intent::Audio => "audio",
      Intent::Video => "video",
      Intent::Explain => "explain",
    }
  }
}

/// Priority list. Order is significant.
const INTENT_KEYWORDS: &[(Intent, &[&str])] = &[
  (Intent::Diagram, &["mindmap", "mind map", "concept map", "diagram", "visual map"]),
  (Intent::Flashcards, &["flashcard", "flash card", "flash cards", "study cards", "revision cards"]),
  (Intent::Quiz, &["quiz", "test me", "test my knowledge", "mcq", "multiple choice"]),
  (
    Intent::Audio,
    &["audio", "speak", "voice", "podcast", "listen", "read aloud", "tell me", "batao", "samjhao", "sunao"],
  ),
  (Intent::Video, &["video", "lecture video", "animation"]),
];

/// Spoken language name → TTS language code. Order is significant.
const LANGUAGES: &[(&str, &str)] = &[
  ("hindi", "hi-IN"),
  ("bengali", "bn-IN"),
  ("bangla", "bn-IN"),
  ("tamil", "ta-IN"),
  ("telugu", "te-IN"),
  ("kannada", "kn-IN"),
  ("malayalam", "ml-IN"),
  ("marathi", "mr-IN"),
  ("gujarati", "gu-IN"),
  ("punjabi", "pa-IN"),
  ("english", "en-IN"),
];

const LANGUAGE_PATTERNS: &[&str] = &["in {}", "{} mein", "{} me", "{} audio", "explain in {}"];

pub const DEFAULT_LANGUAGE: &str = "en-IN";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Classification {
  pub intent: Intent,
  pub language_code: String,
  /// True when the query named a language through one of the templated patterns.
  pub language_detected: bool,
  pub wants_audio: bool,
}

pub fn detect_intent(query_lower: &str) -> Intent {
  INTENT_KEYWORDS
    .iter()
    .find(|(_, kws)| kws.iter().any(|kw| query_lower.contains(kw)))
    .map(|(intent, _)| *intent)
    .unwrap_or_default()
}

pub fn detect_language(query_lower: &str) -> Option<&'static str> {
  LANGUAGES
    .iter()
    .find(|(name, _)| {
      LANGUAGE_PATTERNS
        .iter()
        .any(|p| query_lower.contains(&p.replace("{}", name)))
    })
    .map(|(_, code)| *code)
}

/// Classify a tutor query. `explicit_audio` is the caller's own audio toggle.
pub fn classify(query: &str, explicit_audio: bool) -> Classification {
  let q = query.to_lowercase();
  let intent = detect_intent(&q);
  let language = detect_language(&q);
  // naming a spoken language implies the learner wants to hear it
  let wants_audio = explicit_audio || intent == Intent::Audio || has_audio_keyword(&q) || language.is_some();

  Classification {
    intent,
    language_code: language.unwrap_or(DEFAULT_LANGUAGE).to_string(),
    language_detected: language.is_some(),
    wants_audio,
  }
}

fn has_audio_keyword(query_lower: &str) -> bool {
  INTENT_KEYWORDS
    .iter()
    .filter(|(i, _)| *i == Intent::Audio)
    .any(|(_, kws)| kws.iter().any(|kw| query_lower.contains(kw)))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mindmap_request_is_a_diagram() {
    let c = classify("make me a mindmap of photosynthesis", false);
    assert_eq!(c.intent, Intent::Diagram);
    assert_eq!(c.language_code, "en-IN");
    assert!(!c.wants_audio);
  }

  #[test]
  fn hinglish_language_mention_implies_audio() {
    let c = classify("padhao mujhe hindi mein", false);
    assert_eq!(c.intent, Intent::Explain);
    assert_eq!(c.language_code, "hi-IN");
    assert!(c.language_detected);
    assert!(c.wants_audio);
  }

  #[test]
  fn category_order_is_a_priority_list() {
    // both diagram and quiz keywords present: diagram is checked first
    assert_eq!(classify("quiz me with a diagram", false).intent, Intent::Diagram);
    // flashcards beat audio
    assert_eq!(classify("read aloud my flashcards", false).intent, Intent::Flashcards);
    assert!(classify("read aloud my flashcards", false).wants_audio);
  }

  #[test]
  fn explicit_flag_forces_audio() {
    let c = classify("explain osmosis", true);
    assert_eq!(c.intent, Intent::Explain);
    assert!(c.wants_audio);
  }

  #[test]
  fn first_language_in_table_wins() {
    assert_eq!(detect_language("explain in tamil or in hindi"), Some("hi-IN"));
    assert_eq!(detect_language("bangla audio please"), Some("bn-IN"));
    assert_eq!(detect_language("nothing here"), None);
  }

  #[test]
  fn video_keyword_detected_after_audio() {
    assert_eq!(classify("make a video on gravity", false).intent, Intent::Video);
    assert_eq!(classify("speak a video script", false).intent, Intent::Audio);
  }
}
