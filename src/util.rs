//! Small utility helpers used across modules.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use once_cell::sync::Lazy;
use regex::Regex;

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  let total = s.chars().count();
  if total <= max { s.to_string() } else { format!("{}… ({} chars total)", take_chars(s, max), total) }
}

/// First `n` characters of `s` (char based, never splits a code point).
pub fn take_chars(s: &str, n: usize) -> String {
  s.chars().take(n).collect()
}

/// Dedup identity of a retrieved item. `prefix` limits hashing to the first N chars;
/// items sharing that prefix are treated as the same item.
pub fn content_key(text: &str, prefix: Option<usize>) -> u64 {
  let mut h = DefaultHasher::new();
  match prefix {
    Some(n) => take_chars(text, n).hash(&mut h),
    None => text.hash(&mut h),
  }
  h.finish()
}

static NON_ALNUM_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9\s]").expect("static regex"));
static WS_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
static SPEECH_MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[*#`_~\[\]()]").expect("static regex"));

/// Study-session names become part of a collection name.
pub fn sanitize_session_name(name: &str) -> String {
  let clean = NON_ALNUM_SPACE.replace_all(name, "");
  let clean = WS_RUN.replace_all(clean.trim(), "_");
  take_chars(&clean.to_lowercase(), 50)
}

/// Retrieval collection holding a user's uploaded material for one study session.
pub fn session_collection(user_id: &str, session_name: &str) -> String {
  format!("user_{}_{}_rag", user_id, sanitize_session_name(session_name))
}

/// Prepare text for speech synthesis: drop markdown, collapse whitespace, cap length.
pub fn clean_for_speech(text: &str, max_chars: usize) -> String {
  let clean = SPEECH_MARKUP.replace_all(text, "");
  let clean = WS_RUN.replace_all(&clean, " ");
  let clean = clean.trim();
  if clean.chars().count() > max_chars {
    format!("{}...", take_chars(clean, max_chars))
  } else {
    clean.to_string()
  }
}
