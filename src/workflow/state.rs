//! Shared state threaded through one workflow run.
//!
//! State is a map of named JSON fields. Stages read typed views of it and return a
//! [`StateUpdate`] that the engine merges field by field.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkflowState {
  fields: Map<String, Value>,
}

impl WorkflowState {
  pub fn new() -> Self {
    Self::default()
  }

  /// Seed an input field (builder style).
  pub fn with(mut self, field: &str, value: impl Serialize) -> Self {
    self.set(field, value);
    self
  }

  pub fn set(&mut self, field: &str, value: impl Serialize) {
    let v = serde_json::to_value(value).unwrap_or_else(|e| {
      warn!(target: "workflow", %field, error = %e, "Unserializable state value; storing null");
      Value::Null
    });
    self.fields.insert(field.to_string(), v);
  }

  pub fn contains(&self, field: &str) -> bool {
    self.fields.contains_key(field)
  }

  pub fn raw(&self, field: &str) -> Option<&Value> {
    self.fields.get(field)
  }

  /// Typed read. `None` if the field is absent or has the wrong shape.
  pub fn get<T: DeserializeOwned>(&self, field: &str) -> Option<T> {
    self.fields.get(field).and_then(|v| serde_json::from_value(v.clone()).ok())
  }

  pub fn get_or_default<T: DeserializeOwned + Default>(&self, field: &str) -> T {
    self.get(field).unwrap_or_default()
  }

  pub fn str(&self, field: &str) -> &str {
    self.fields.get(field).and_then(Value::as_str).unwrap_or_default()
  }

  /// Boolean-ish reading used by conditional transitions.
  pub fn is_truthy(&self, field: &str) -> bool {
    match self.fields.get(field) {
      None | Some(Value::Null) => false,
      Some(Value::Bool(b)) => *b,
      Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
      Some(Value::String(s)) => !s.is_empty(),
      Some(Value::Array(a)) => !a.is_empty(),
      Some(Value::Object(o)) => !o.is_empty(),
    }
  }

  pub fn field_names(&self) -> impl Iterator<Item = &str> {
    self.fields.keys().map(String::as_str)
  }

  pub(crate) fn merge(&mut self, update: StateUpdate) {
    for (k, v) in update.fields {
      self.fields.insert(k, v);
    }
  }
}

/// Partial state produced by one stage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateUpdate {
  fields: Map<String, Value>,
}

impl StateUpdate {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(mut self, field: &str, value: impl Serialize) -> Self {
    let v = serde_json::to_value(value).unwrap_or(Value::Null);
    self.fields.insert(field.to_string(), v);
    self
  }

  pub fn contains(&self, field: &str) -> bool {
    self.fields.contains_key(field)
  }

  pub(crate) fn take(&mut self, field: &str) -> Option<Value> {
    self.fields.remove(field)
  }

  pub(crate) fn insert_raw(&mut self, field: &str, value: Value) {
    self.fields.insert(field.to_string(), value);
  }

  pub(crate) fn field_names(&self) -> Vec<String> {
    self.fields.keys().cloned().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn truthiness_follows_value_kind() {
    let s = WorkflowState::new()
      .with("yes", true)
      .with("no", false)
      .with("empty", "")
      .with("list", vec![1])
      .with("none", Value::Null)
      .with("zero", 0);
    assert!(s.is_truthy("yes"));
    assert!(s.is_truthy("list"));
    assert!(!s.is_truthy("no"));
    assert!(!s.is_truthy("empty"));
    assert!(!s.is_truthy("none"));
    assert!(!s.is_truthy("zero"));
    assert!(!s.is_truthy("missing"));
  }

  #[test]
  fn merge_overwrites_by_field_name() {
    let mut s = WorkflowState::new().with("a", 1).with("b", "keep");
    s.merge(StateUpdate::new().set("a", json!({"x": 2})));
    assert_eq!(s.raw("a"), Some(&json!({"x": 2})));
    assert_eq!(s.str("b"), "keep");
  }

  #[test]
  fn typed_reads_tolerate_shape_mismatch() {
    let s = WorkflowState::new().with("plan", "not a list");
    assert_eq!(s.get::<Vec<String>>("plan"), None);
    assert!(s.get_or_default::<Vec<String>>("plan").is_empty());
  }
}
