//! Domain models shared by agents, registries and the API: exam blueprints and
//! structures, selected/placed questions, assembled papers, journey nodes, lecture scripts.

use serde::{Deserialize, Serialize};

fn default_module() -> String { "General".into() }
fn default_module_marks() -> u32 { 20 }

/// One module of an exam blueprint. Total marks across modules should be 100 (advisory).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlueprintModule {
  #[serde(default = "default_module")]
  pub module: String,
  /// Target marks for this module.
  #[serde(default = "default_module_marks")]
  pub marks: u32,
  #[serde(default)]
  pub topics: Vec<String>,
}

impl BlueprintModule {
  /// Search queries for this module: its name, then each topic.
  pub fn queries(&self) -> Vec<String> {
    std::iter::once(self.module.clone()).chain(self.topics.iter().cloned()).collect()
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionMetadata {
  pub source_file: String,
  #[serde(default)] pub year: Option<String>,
  pub marks: u32,
  #[serde(default)] pub module: Option<String>,
  #[serde(default)] pub difficulty: Option<String>,
}

/// A question picked from the bank by the blueprint selector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExamQuestion {
  pub text: String,
  pub metadata: QuestionMetadata,
}

/// Unit-wise layout of a paper, learned from a reference paper.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamStructure {
  #[serde(default = "default_structure_type")]
  pub structure_type: String,
  pub unit_count: u32,
  pub subquestion_labels: Vec<String>,
  pub has_or_choice: bool,
  pub marks_per_subquestion: u32,
}

fn default_structure_type() -> String { "unit_wise".into() }

impl ExamStructure {
  /// "A", plus "B" when units offer an OR choice.
  pub fn choices(&self) -> &'static [&'static str] {
    if self.has_or_choice { &["A", "B"] } else { &["A"] }
  }

  pub fn slot_count(&self) -> usize {
    self.unit_count as usize * self.choices().len() * self.subquestion_labels.len()
  }
}

/// A question placed into one slot of a structured paper.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlacedQuestion {
  pub unit_no: u32,
  /// "A" or "B" (before/after OR).
  pub main_choice: String,
  pub sub_label: String,
  pub text: String,
  pub marks: u32,
  pub source_file: String,
  pub module: String,
}

/// Anything that carries a marks value and can be bucketed into exam parts.
pub trait Marked {
  fn marks(&self) -> u32;
}

impl Marked for ExamQuestion {
  fn marks(&self) -> u32 { self.metadata.marks }
}

impl Marked for PlacedQuestion {
  fn marks(&self) -> u32 { self.marks }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExamPart<T> {
  pub title: String,
  pub instructions: String,
  pub questions: Vec<T>,
  pub total_marks: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExamMetadata {
  pub total_questions: usize,
  pub total_marks: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssembledExam<T> {
  #[serde(rename = "Part A")]
  pub part_a: ExamPart<T>,
  #[serde(rename = "Part B")]
  pub part_b: ExamPart<T>,
  #[serde(rename = "Part C")]
  pub part_c: ExamPart<T>,
  pub metadata: ExamMetadata,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
  Locked,
  Unlocked,
  Completed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
  pub question: String,
  pub options: Vec<String>,
  /// Index into `options`.
  pub correct_answer: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JourneyNode {
  pub id: String,
  pub title: String,
  pub description: String,
  pub status: NodeStatus,
  /// Lesson body (Markdown); empty until first accessed.
  #[serde(default)]
  pub content_summary: String,
  #[serde(default)]
  pub quiz_questions: Vec<QuizQuestion>,
}

impl JourneyNode {
  pub fn new(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      title: title.into(),
      description: description.into(),
      status: NodeStatus::Locked,
      content_summary: String::new(),
      quiz_questions: Vec::new(),
    }
  }
}

/// One learner's progress through one course. Mutated only by `progression`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JourneyState {
  pub course_id: String,
  pub syllabus_summary: String,
  pub nodes: Vec<JourneyNode>,
  pub current_node_index: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
  #[serde(default, deserialize_with = "lenient_id")]
  pub id: String,
  pub question: String,
  pub answer: String,
}

/// Models emit card ids as either `"1"` or `1`.
fn lenient_id<'de, D: serde::Deserializer<'de>>(d: D) -> Result<String, D::Error> {
  Ok(match serde_json::Value::deserialize(d)? {
    serde_json::Value::String(s) => s,
    serde_json::Value::Null => String::new(),
    other => other.to_string(),
  })
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scene {
  pub visual: String,
  pub narration: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LectureScript {
  pub title: String,
  pub scenes: Vec<Scene>,
}

impl LectureScript {
  pub fn narration(&self) -> String {
    self.scenes.iter().map(|s| s.narration.as_str()).collect::<Vec<_>>().join(" ")
  }
}
