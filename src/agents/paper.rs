//! Structure-aware exam paper: learn a unit-wise layout from a reference paper,
//! split the syllabus into one topic per unit, then fill every slot from the bank.
//!
//!   structure -> topics -> slots -> assembler

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::examiner::{assemble, Assemble, EXAM};
use super::Deps;
use crate::config::Prompts;
use crate::domain::{AssembledExam, ExamStructure, PlacedQuestion};
use crate::extract::{extract_json_as, JsonShape};
use crate::llm::{LanguageModel, ModelTier};
use crate::seeds::{fallback_exam_structure, DEFAULT_REFERENCE_TEXT};
use crate::services::{Document, Retriever, EXAM_COLLECTION};
use crate::util::{content_key, fill_template, take_chars};
use crate::workflow::{Stage, StageError, StateUpdate, Workflow, WorkflowError, WorkflowState};

pub const SYLLABUS: &str = "syllabus";
pub const REFERENCE: &str = "reference_text";
pub const SUBJECT_FILTER: &str = "subject_filter";
pub const STRUCTURE: &str = "structure";
pub const TOPICS: &str = "unit_topics";
pub const PLACED: &str = "placed_questions";

const REFERENCE_PROMPT_CHARS: usize = 5000;
const SYLLABUS_PROMPT_CHARS: usize = 4000;
const SLOT_K: usize = 25;

/// Learned layouts keyed by a hash of the reference text.
pub type StructureCache = Arc<RwLock<HashMap<u64, ExamStructure>>>;

pub fn workflow(deps: &Deps) -> Result<Workflow, WorkflowError> {
  Workflow::builder("exam_paper")
    .stage(StructureStage { llm: deps.llm.clone(), prompts: deps.prompts.clone(), cache: StructureCache::default() })
    .stage(TopicsStage { llm: deps.llm.clone(), prompts: deps.prompts.clone() })
    .stage(SlotsStage { retriever: deps.retriever.clone() })
    .stage(Assemble::<PlacedQuestion>::from(PLACED))
    .edge("structure", "topics")
    .edge("topics", "slots")
    .edge("slots", "assembler")
    .finish("assembler")
    .build()
}

#[derive(Clone, Debug)]
pub struct PaperInput {
  pub syllabus: String,
  pub reference_text: Option<String>,
  pub subject_filter: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PaperOutcome {
  pub structure: ExamStructure,
  pub unit_topics: Vec<String>,
  pub exam: AssembledExam<PlacedQuestion>,
  pub degraded: Vec<&'static str>,
}

#[instrument(level = "info", skip(wf, input), fields(syllabus_len = input.syllabus.len(), filter = ?input.subject_filter))]
pub async fn run(wf: &Workflow, input: PaperInput) -> PaperOutcome {
  let reference = input
    .reference_text
    .filter(|r| !r.trim().is_empty())
    .unwrap_or_else(|| DEFAULT_REFERENCE_TEXT.to_string());
  let mut state = WorkflowState::new().with(SYLLABUS, &input.syllabus).with(REFERENCE, reference);
  if let Some(f) = input.subject_filter.filter(|f| !f.trim().is_empty()) {
    state.set(SUBJECT_FILTER, f);
  }
  let report = wf.run(state).await;
  PaperOutcome {
    structure: report.state.get(STRUCTURE).unwrap_or_else(fallback_exam_structure),
    unit_topics: report.state.get_or_default(TOPICS),
    exam: report.state.get(EXAM).unwrap_or_else(|| assemble(Vec::<PlacedQuestion>::new())),
    degraded: report.degraded(),
  }
}

fn structure_of(state: &WorkflowState) -> ExamStructure {
  state.get(STRUCTURE).unwrap_or_else(fallback_exam_structure)
}

struct StructureStage {
  llm: Arc<dyn LanguageModel>,
  prompts: Arc<Prompts>,
  cache: StructureCache,
}

#[async_trait]
impl Stage for StructureStage {
  fn name(&self) -> &'static str { "structure" }
  fn writes(&self) -> &'static [&'static str] { &[STRUCTURE] }

  async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StageError> {
    let reference = state.str(REFERENCE);
    let key = content_key(reference, None);
    if let Some(hit) = self.cache.read().await.get(&key) {
      debug!(target: "exam", "Structure cache hit");
      return Ok(StateUpdate::new().set(STRUCTURE, hit));
    }

    let excerpt = take_chars(reference, REFERENCE_PROMPT_CHARS);
    let prompt = fill_template(&self.prompts.structure_user_template, &[("reference", &excerpt)]);
    let text = self.llm.invoke("", &prompt, ModelTier::Smart).await?;
    let structure: ExamStructure = extract_json_as(&text, JsonShape::Object)?;
    if structure.unit_count == 0 || structure.subquestion_labels.is_empty() || structure.marks_per_subquestion == 0 {
      return Err(StageError::invalid("structure has no slots"));
    }
    info!(
      target: "exam",
      units = structure.unit_count,
      labels = structure.subquestion_labels.len(),
      or_choice = structure.has_or_choice,
      "Reference structure learned"
    );
    self.cache.write().await.insert(key, structure.clone());
    Ok(StateUpdate::new().set(STRUCTURE, structure))
  }

  fn fallback(&self, _state: &WorkflowState) -> StateUpdate {
    StateUpdate::new().set(STRUCTURE, fallback_exam_structure())
  }
}

static TOPIC_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:\d+\s*[.):-]?|-)\s*").expect("static regex"));

/// Numbered or bulleted lines become topics; exactly `count` come out, padded with
/// `Unit {n} General Topic`.
pub fn parse_topics(text: &str, count: usize) -> Vec<String> {
  let mut topics: Vec<String> = text
    .lines()
    .map(str::trim)
    .filter(|l| l.starts_with(|c: char| c.is_ascii_digit()) || l.starts_with('-'))
    .map(|l| TOPIC_MARKER.replace(l, "").trim().to_string())
    .filter(|t| !t.is_empty())
    .take(count)
    .collect();
  while topics.len() < count {
    topics.push(format!("Unit {} General Topic", topics.len() + 1));
  }
  topics
}

struct TopicsStage {
  llm: Arc<dyn LanguageModel>,
  prompts: Arc<Prompts>,
}

#[async_trait]
impl Stage for TopicsStage {
  fn name(&self) -> &'static str { "topics" }
  fn writes(&self) -> &'static [&'static str] { &[TOPICS] }

  async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StageError> {
    let count = structure_of(state).unit_count as usize;
    let syllabus = take_chars(state.str(SYLLABUS), SYLLABUS_PROMPT_CHARS);
    let count_s = count.to_string();
    let user = fill_template(&self.prompts.topics_user_template, &[("count", &count_s), ("syllabus", &syllabus)]);
    let text = self.llm.invoke("", &user, ModelTier::Smart).await?;
    let topics = parse_topics(&text, count);
    debug!(target: "exam", ?topics, "Unit topics");
    Ok(StateUpdate::new().set(TOPICS, topics))
  }

  fn fallback(&self, state: &WorkflowState) -> StateUpdate {
    let count = structure_of(state).unit_count;
    StateUpdate::new().set(TOPICS, (1..=count).map(|n| format!("Unit {}", n)).collect::<Vec<_>>())
  }
}

/// First result from a matching source that was not used yet.
fn pick_slot<'a>(results: &'a [Document], filter: Option<&str>, used: &mut HashSet<u64>) -> Option<&'a Document> {
  let filter = filter.map(str::to_lowercase);
  results.iter().find(|doc| {
    if let Some(f) = &filter {
      let source = doc.metadata.source_file.as_deref().unwrap_or_default().to_lowercase();
      if !source.contains(f.as_str()) {
        return false;
      }
    }
    used.insert(content_key(&doc.content, None))
  })
}

fn placeholder(unit_no: u32, choice: &str, label: &str, topic: &str, marks: u32) -> PlacedQuestion {
  PlacedQuestion {
    unit_no,
    main_choice: choice.into(),
    sub_label: label.into(),
    text: format!("Question about {} not found in DB.", topic),
    marks,
    source_file: "System".into(),
    module: topic.into(),
  }
}

/// Every slot filled with a placeholder.
pub fn placeholder_paper(structure: &ExamStructure, topics: &[String]) -> Vec<PlacedQuestion> {
  let mut out = Vec::with_capacity(structure.slot_count());
  for (i, topic) in topics.iter().enumerate() {
    for choice in structure.choices() {
      for label in &structure.subquestion_labels {
        out.push(placeholder(i as u32 + 1, choice, label, topic, structure.marks_per_subquestion));
      }
    }
  }
  out
}

/// One question per (unit, choice, label). Missing or unusable results become
/// placeholders, so the output always has exactly one item per slot.
pub async fn fill_slots(
  retriever: &dyn Retriever,
  structure: &ExamStructure,
  topics: &[String],
  subject_filter: Option<&str>,
) -> Vec<PlacedQuestion> {
  let mut used = HashSet::new();
  let mut out = Vec::with_capacity(structure.slot_count());
  for (i, topic) in topics.iter().enumerate() {
    let unit_no = i as u32 + 1;
    for choice in structure.choices() {
      for label in &structure.subquestion_labels {
        let query = format!("{} {}", topic, label);
        let results = match retriever.retrieve(EXAM_COLLECTION, &query, SLOT_K).await {
          Ok(r) => r,
          Err(e) => {
            warn!(target: "exam", %query, error = %e, "Slot search failed; using placeholder");
            Vec::new()
          }
        };
        let placed = match pick_slot(&results, subject_filter, &mut used) {
          Some(doc) => PlacedQuestion {
            unit_no,
            main_choice: (*choice).into(),
            sub_label: label.clone(),
            text: doc.content.clone(),
            marks: structure.marks_per_subquestion,
            source_file: doc.metadata.source_file.clone().unwrap_or_else(|| "Unknown".into()),
            module: topic.clone(),
          },
          None => {
            if !results.is_empty() {
              debug!(target: "exam", %query, filter = ?subject_filter, "No usable match for slot");
            }
            placeholder(unit_no, choice, label, topic, structure.marks_per_subquestion)
          }
        };
        out.push(placed);
      }
    }
  }
  out
}

struct SlotsStage {
  retriever: Arc<dyn Retriever>,
}

#[async_trait]
impl Stage for SlotsStage {
  fn name(&self) -> &'static str { "slots" }
  fn writes(&self) -> &'static [&'static str] { &[PLACED] }

  async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StageError> {
    let structure = structure_of(state);
    let topics: Vec<String> = state.get_or_default(TOPICS);
    let filter = state.get::<String>(SUBJECT_FILTER);
    let placed = fill_slots(self.retriever.as_ref(), &structure, &topics, filter.as_deref()).await;
    let placeholders = placed.iter().filter(|p| p.source_file == "System").count();
    info!(target: "exam", slots = placed.len(), placeholders, "Slots filled");
    Ok(StateUpdate::new().set(PLACED, placed))
  }

  fn fallback(&self, state: &WorkflowState) -> StateUpdate {
    let topics: Vec<String> = state.get_or_default(TOPICS);
    StateUpdate::new().set(PLACED, placeholder_paper(&structure_of(state), &topics))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::agents::testing::deps_with;
  use crate::services::mock::{FixedRetriever, ScriptedModel};
  use crate::services::retriever::DocMetadata;

  fn from_source(text: &str, source: &str) -> Document {
    Document::new(text).with_metadata(DocMetadata { source_file: Some(source.into()), ..Default::default() })
  }

  #[test]
  fn topics_are_parsed_and_padded() {
    let text = "Here are the units:\n1. Linear Algebra\n- Probability\nnot a topic\n3) Optimisation";
    assert_eq!(parse_topics(text, 2), vec!["Linear Algebra", "Probability"]);
    assert_eq!(
      parse_topics("1. Sets", 3),
      vec!["Sets", "Unit 2 General Topic", "Unit 3 General Topic"]
    );
  }

  #[tokio::test]
  async fn empty_bank_yields_placeholders_for_every_slot() {
    let structure = ExamStructure {
      structure_type: "unit_wise".into(),
      unit_count: 2,
      subquestion_labels: vec!["a".into()],
      has_or_choice: true,
      marks_per_subquestion: 5,
    };
    let topics = vec!["Sorting".to_string(), "Graphs".to_string()];
    let placed = fill_slots(&FixedRetriever::default(), &structure, &topics, None).await;
    assert_eq!(placed.len(), 4);
    assert!(placed.iter().all(|p| p.source_file == "System" && p.marks == 5));
    assert_eq!(placed[3].text, "Question about Graphs not found in DB.");
    assert_eq!((placed[3].unit_no, placed[3].main_choice.as_str()), (2, "B"));

    let exam = assemble(placed);
    assert_eq!(exam.part_a.questions.len(), 4);
    assert_eq!(exam.metadata.total_marks, 20);
  }

  #[tokio::test]
  async fn two_units_two_labels_without_choice() {
    let structure = ExamStructure {
      structure_type: "unit_wise".into(),
      unit_count: 2,
      subquestion_labels: vec!["a".into(), "b".into()],
      has_or_choice: false,
      marks_per_subquestion: 5,
    };
    let topics = vec!["Sorting".to_string(), "Graphs".to_string()];
    let placed = fill_slots(&FixedRetriever::default(), &structure, &topics, None).await;
    assert_eq!(placed.len(), 4);
    assert!(placed.iter().all(|p| p.source_file == "System" && p.marks == 5 && p.main_choice == "A"));
    let slots: Vec<(u32, &str)> = placed.iter().map(|p| (p.unit_no, p.sub_label.as_str())).collect();
    assert_eq!(slots, vec![(1, "a"), (1, "b"), (2, "a"), (2, "b")]);
    assert_eq!(assemble(placed).metadata.total_marks, 20);
  }

  #[tokio::test]
  async fn subject_filter_and_full_content_dedup() {
    let structure = ExamStructure {
      structure_type: "unit_wise".into(),
      unit_count: 1,
      subquestion_labels: vec!["a".into(), "b".into(), "c".into()],
      has_or_choice: false,
      marks_per_subquestion: 7,
    };
    let retriever = FixedRetriever {
      docs: vec![
        from_source("Explain entropy.", "PHY_2021.pdf"),
        from_source("Define a heap.", "CS36_2022.pdf"),
        from_source("Explain quicksort.", "cs41_2020.pdf"),
      ],
      fail: false,
    };
    let placed = fill_slots(&retriever, &structure, &["Algorithms".into()], Some("CS")).await;
    let texts: Vec<&str> = placed.iter().map(|p| p.text.as_str()).collect();
    assert_eq!(texts, vec!["Define a heap.", "Explain quicksort.", "Question about Algorithms not found in DB."]);
    assert_eq!(placed[1].source_file, "cs41_2020.pdf");
  }

  #[tokio::test]
  async fn learned_structure_is_cached_per_reference() {
    let llm = Arc::new(
      ScriptedModel::new()
        .reply(r#"{"structure_type": "unit_wise", "unit_count": 1, "subquestion_labels": ["a"], "has_or_choice": false, "marks_per_subquestion": 10}"#)
        .reply("1. Trees")
        .reply("1. Heaps"),
    );
    let wf = workflow(&deps_with(llm.clone(), FixedRetriever::default())).unwrap();
    let input = PaperInput { syllabus: "DSA".into(), reference_text: Some("Paper X".into()), subject_filter: None };

    let first = run(&wf, input.clone()).await;
    assert_eq!(first.structure.marks_per_subquestion, 10);
    assert_eq!(first.unit_topics, vec!["Trees"]);
    assert_eq!(first.exam.part_b.questions.len(), 1);

    let second = run(&wf, input).await;
    assert_eq!(second.structure, first.structure);
    assert_eq!(second.unit_topics, vec!["Heaps"]);
    // structure once, topics twice
    assert_eq!(llm.calls(), 3);
  }
}
