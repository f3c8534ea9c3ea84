//! Pull structured payloads out of free-form model output.
//!
//! Model replies mix prose, markdown fences and the occasional stray control byte.
//! Extraction tries, in order:
//!   1) the first fence tagged with the expected language (```json, ```mermaid)
//!   2) for JSON, the span from the first opening bracket/brace to the last closing one
//!   3) strip control characters
//!   4) parse (JSON) or return the trimmed interior (code blocks)
//!
//! Failure is a typed error; callers fall back to hand-authored defaults.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
  #[error("no {0} payload found in model output")]
  NotFound(&'static str),
  #[error("payload is not valid JSON: {0}")]
  Json(#[from] serde_json::Error),
}

/// Expected top-level JSON shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JsonShape {
  Object,
  Array,
}

impl JsonShape {
  fn delimiters(self) -> (char, char) {
    match self {
      JsonShape::Object => ('{', '}'),
      JsonShape::Array => ('[', ']'),
    }
  }

  fn label(self) -> &'static str {
    match self {
      JsonShape::Object => "JSON object",
      JsonShape::Array => "JSON array",
    }
  }
}

/// Interior of the first fence opened with "```{tag}", if any.
fn fenced_interior<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
  let opener = format!("```{}", tag);
  let start = text.find(&opener)?;
  let after_tag = &text[start + opener.len()..];
  // the tag must end the opener line: "```json" matches, "```jsonc" does not
  let body_start = after_tag.find('\n')?;
  if !after_tag[..body_start].trim().is_empty() {
    return None;
  }
  let body = &after_tag[body_start + 1..];
  let end = body.find("```")?;
  Some(&body[..end])
}

fn bracket_span(text: &str, shape: JsonShape) -> Option<&str> {
  let (open, close) = shape.delimiters();
  let start = text.find(open)?;
  let end = text.rfind(close)?;
  if end < start {
    return None;
  }
  Some(&text[start..=end])
}

/// Drop C0 controls and DEL/C1 controls. Newlines and tabs are controls too; JSON
/// tolerates their removal between tokens, and raw ones inside strings are invalid anyway.
pub fn strip_control_chars(s: &str) -> String {
  s.chars()
    .filter(|&c| {
      let cp = c as u32;
      !(cp < 0x20 || (0x7F..=0x9F).contains(&cp))
    })
    .collect()
}

/// Locate and parse a JSON payload of the expected shape.
pub fn extract_json(text: &str, shape: JsonShape) -> Result<Value, ExtractError> {
  let candidate = fenced_interior(text, "json")
    .or_else(|| bracket_span(text, shape))
    .ok_or(ExtractError::NotFound(shape.label()))?;
  let cleaned = strip_control_chars(candidate);
  let cleaned = cleaned.trim();
  if cleaned.is_empty() {
    return Err(ExtractError::NotFound(shape.label()));
  }
  Ok(serde_json::from_str::<Value>(cleaned)?)
}

/// Same as [`extract_json`] but deserializes straight into `T`.
pub fn extract_json_as<T: DeserializeOwned>(text: &str, shape: JsonShape) -> Result<T, ExtractError> {
  let v = extract_json(text, shape)?;
  Ok(serde_json::from_value(v)?)
}

/// Raw interior of a tagged fence (e.g. mermaid source). Code keeps its newlines.
pub fn extract_fenced(text: &str, tag: &'static str) -> Result<String, ExtractError> {
  let body = fenced_interior(text, tag).ok_or(ExtractError::NotFound(tag))?;
  let body = body.trim();
  if body.is_empty() {
    return Err(ExtractError::NotFound(tag));
  }
  Ok(body.to_string())
}

/// Remove the first tagged fence (opener through closer) from prose.
pub fn strip_fenced(text: &str, tag: &str) -> String {
  let opener = format!("```{}", tag);
  let Some(start) = text.find(&opener) else { return text.to_string() };
  let rest = &text[start + opener.len()..];
  let Some(nl) = rest.find('\n') else { return text.to_string() };
  let Some(close) = rest[nl + 1..].find("```") else { return text.to_string() };
  let end = start + opener.len() + nl + 1 + close + 3;
  format!("{}{}", &text[..start], &text[end..]).trim().to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn fenced_block_wins_over_surrounding_prose() {
    let text = "Here you go:\n```json\n{\"a\": [1, 2]}\n```\nAnd an aside {\"b\": 2}";
    let v = extract_json(text, JsonShape::Object).unwrap();
    assert_eq!(v, serde_json::from_str::<Value>("{\"a\": [1, 2]}").unwrap());
  }

  #[test]
  fn bracket_span_used_when_no_fence() {
    let text = "Sure! [{\"module\": \"M1\", \"marks\": 20}] hope that helps";
    let v = extract_json(text, JsonShape::Array).unwrap();
    assert_eq!(v, json!([{"module": "M1", "marks": 20}]));
  }

  #[test]
  fn neither_fence_nor_span_is_an_error() {
    let err = extract_json("no structure here at all", JsonShape::Object).unwrap_err();
    assert!(matches!(err, ExtractError::NotFound(_)));
  }

  #[test]
  fn malformed_span_is_a_parse_error_not_an_empty_success() {
    let err = extract_json("{ definitely not json }", JsonShape::Object).unwrap_err();
    assert!(matches!(err, ExtractError::Json(_)));
  }

  #[test]
  fn control_characters_are_stripped_before_parsing() {
    let text = "{\"title\": \"Cells\u{0007}\", \"n\":\u{0085} 3}";
    let v = extract_json(text, JsonShape::Object).unwrap();
    assert_eq!(v, json!({"title": "Cells", "n": 3}));
  }

  #[test]
  fn only_first_fence_is_considered() {
    let text = "```json\n{\"first\": true}\n```\n```json\n{\"second\": true}\n```";
    assert_eq!(extract_json(text, JsonShape::Object).unwrap(), json!({"first": true}));
  }

  #[test]
  fn mermaid_source_keeps_line_structure() {
    let text = "Intro line.\n```mermaid\nmindmap\n  root((Cells))\n    Nucleus\n```\nDone.";
    assert_eq!(extract_fenced(text, "mermaid").unwrap(), "mindmap\n  root((Cells))\n    Nucleus");
    assert_eq!(strip_fenced(text, "mermaid"), "Intro line.\n\nDone.");
  }

  #[test]
  fn missing_fence_reports_tag() {
    let err = extract_fenced("plain text", "mermaid").unwrap_err();
    assert_eq!(err.to_string(), "no mermaid payload found in model output");
  }
}
