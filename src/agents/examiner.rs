//! Blueprint examiner: syllabus -> blueprint -> quota-bounded selection -> parts A/B/C.
//!
//! Also home of the pure bucketing used by the structure-aware paper pipeline.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::Deps;
use crate::config::Prompts;
use crate::domain::{
  AssembledExam, BlueprintModule, ExamMetadata, ExamPart, ExamQuestion, Marked, QuestionMetadata,
};
use crate::extract::{extract_json_as, JsonShape};
use crate::llm::{LanguageModel, ModelTier};
use crate::seeds::fallback_blueprint;
use crate::services::{Document, Retriever, EXAM_COLLECTION};
use crate::util::{content_key, fill_template, take_chars};
use crate::workflow::{Stage, StageError, StateUpdate, Workflow, WorkflowError, WorkflowState};

pub const SYLLABUS: &str = "syllabus";
pub const BLUEPRINT: &str = "blueprint";
pub const SELECTED: &str = "selected_questions";
pub const EXAM: &str = "exam";

const SYLLABUS_PROMPT_CHARS: usize = 6000;
const SELECT_K: usize = 5;
/// A module may overshoot its target by at most this many marks.
pub const TOLERANCE: u32 = 5;
/// Marks assumed for a bank item that carries none.
pub const DEFAULT_QUESTION_MARKS: u32 = 5;
/// Selection identity hashes only this prefix of the question text.
pub const DEDUP_PREFIX_CHARS: usize = 100;

pub fn workflow(deps: &Deps) -> Result<Workflow, WorkflowError> {
  Workflow::builder("examiner")
    .stage(BlueprintStage { llm: deps.llm.clone(), prompts: deps.prompts.clone() })
    .stage(Selector { retriever: deps.retriever.clone() })
    .stage(Assemble::<ExamQuestion>::from(SELECTED))
    .edge("blueprint", "selector")
    .edge("selector", "assembler")
    .finish("assembler")
    .build()
}

#[derive(Clone, Debug, Serialize)]
pub struct ExaminerOutcome {
  pub blueprint: Vec<BlueprintModule>,
  pub exam: AssembledExam<ExamQuestion>,
  pub degraded: Vec<&'static str>,
}

#[instrument(level = "info", skip(wf, syllabus), fields(syllabus_len = syllabus.len()))]
pub async fn run(wf: &Workflow, syllabus: &str) -> ExaminerOutcome {
  let report = wf.run(WorkflowState::new().with(SYLLABUS, syllabus)).await;
  ExaminerOutcome {
    blueprint: report.state.get_or_default(BLUEPRINT),
    exam: report.state.get(EXAM).unwrap_or_else(|| assemble(Vec::<ExamQuestion>::new())),
    degraded: report.degraded(),
  }
}

struct BlueprintStage {
  llm: Arc<dyn LanguageModel>,
  prompts: Arc<Prompts>,
}

#[async_trait]
impl Stage for BlueprintStage {
  fn name(&self) -> &'static str { "blueprint" }
  fn writes(&self) -> &'static [&'static str] { &[BLUEPRINT] }

  async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StageError> {
    let syllabus = take_chars(state.str(SYLLABUS), SYLLABUS_PROMPT_CHARS);
    let user = fill_template(&self.prompts.blueprint_user_template, &[("syllabus", &syllabus)]);
    let text = self.llm.invoke(&self.prompts.blueprint_system, &user, ModelTier::Smart).await?;
    let blueprint: Vec<BlueprintModule> = extract_json_as(&text, JsonShape::Array)?;
    if blueprint.is_empty() {
      return Err(StageError::invalid("blueprint has no modules"));
    }
    let total: u32 = blueprint.iter().map(|m| m.marks).sum();
    if total != 100 {
      debug!(target: "exam", total, "Blueprint marks do not sum to 100");
    }
    info!(target: "exam", modules = blueprint.len(), total, "Blueprint ready");
    Ok(StateUpdate::new().set(BLUEPRINT, blueprint))
  }

  fn fallback(&self, _state: &WorkflowState) -> StateUpdate {
    StateUpdate::new().set(BLUEPRINT, fallback_blueprint())
  }
}

/// Outcome of offering one candidate to a module's quota.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
  /// The module already reached its target; stop offering.
  Full,
  Duplicate,
  /// Would push the module past target + tolerance.
  OverBudget,
  Taken,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModuleQuota {
  pub target: u32,
  pub current: u32,
}

impl ModuleQuota {
  pub fn new(target: u32) -> Self {
    Self { target, current: 0 }
  }

  pub fn is_full(&self) -> bool {
    self.current >= self.target
  }
}

/// Dedup memory shared by every module of one selection run.
#[derive(Debug, Default)]
pub struct QuotaSelector {
  seen: HashSet<u64>,
}

impl QuotaSelector {
  /// The identity is recorded before the budget check, so a candidate rejected for
  /// budget is not offered again to a later module.
  pub fn offer(&mut self, quota: &mut ModuleQuota, text: &str, marks: u32) -> Offer {
    if quota.is_full() {
      return Offer::Full;
    }
    if !self.seen.insert(content_key(text, Some(DEDUP_PREFIX_CHARS))) {
      return Offer::Duplicate;
    }
    if quota.current + marks > quota.target + TOLERANCE {
      return Offer::OverBudget;
    }
    quota.current += marks;
    Offer::Taken
  }
}

fn to_exam_question(doc: Document, module: &str, marks: u32) -> ExamQuestion {
  let m = doc.metadata;
  ExamQuestion {
    text: doc.content,
    metadata: QuestionMetadata {
      source_file: m.source_file.unwrap_or_else(|| "Unknown".into()),
      year: Some(m.year.unwrap_or_else(|| "2023".into())),
      marks,
      module: Some(m.module.unwrap_or_else(|| module.to_string())),
      difficulty: Some(m.difficulty.unwrap_or_else(|| "Medium".into())),
    },
  }
}

struct Selector {
  retriever: Arc<dyn Retriever>,
}

#[async_trait]
impl Stage for Selector {
  fn name(&self) -> &'static str { "selector" }
  fn writes(&self) -> &'static [&'static str] { &[SELECTED] }

  async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StageError> {
    let blueprint: Vec<BlueprintModule> = state.get_or_default(BLUEPRINT);
    let mut selector = QuotaSelector::default();
    let mut selected = Vec::new();

    for module in &blueprint {
      let mut quota = ModuleQuota::new(module.marks);
      'queries: for query in module.queries() {
        if quota.is_full() {
          break;
        }
        let docs = match self.retriever.retrieve(EXAM_COLLECTION, &query, SELECT_K).await {
          Ok(d) => d,
          Err(e) => {
            warn!(target: "exam", %query, error = %e, "Bank search failed; next query");
            continue;
          }
        };
        for doc in docs {
          let marks = doc.metadata.marks.unwrap_or(DEFAULT_QUESTION_MARKS);
          match selector.offer(&mut quota, &doc.content, marks) {
            Offer::Full => break 'queries,
            Offer::Taken => selected.push(to_exam_question(doc, &module.module, marks)),
            Offer::Duplicate | Offer::OverBudget => {}
          }
        }
      }
      info!(target: "exam", module = %module.module, current = quota.current, target = quota.target, "Module filled");
    }
    Ok(StateUpdate::new().set(SELECTED, selected))
  }

  fn fallback(&self, _state: &WorkflowState) -> StateUpdate {
    StateUpdate::new().set(SELECTED, Vec::<ExamQuestion>::new())
  }
}

/// Bucket by marks: A <= 5, B 6..=10, C >= 11.
pub fn assemble<T: Marked>(items: Vec<T>) -> AssembledExam<T> {
  let (mut a, mut b, mut c) = (Vec::new(), Vec::new(), Vec::new());
  let total_questions = items.len();
  for q in items {
    match q.marks() {
      0..=5 => a.push(q),
      6..=10 => b.push(q),
      _ => c.push(q),
    }
  }
  let part = |title: &str, instructions: &str, questions: Vec<T>| {
    let total_marks = questions.iter().map(Marked::marks).sum();
    ExamPart { title: title.into(), instructions: instructions.into(), questions, total_marks }
  };
  let part_a = part("Short Answer Questions", "Answer ALL questions. Each question carries equal marks.", a);
  let part_b = part("Medium Answer Questions", "Answer any FOUR questions.", b);
  let part_c = part("Long Answer Questions", "Answer any TWO questions.", c);
  let total_marks = part_a.total_marks + part_b.total_marks + part_c.total_marks;
  AssembledExam { part_a, part_b, part_c, metadata: ExamMetadata { total_questions, total_marks } }
}

/// Pure bucketing stage over whichever question list `input` names.
pub struct Assemble<T> {
  input: &'static str,
  _item: PhantomData<fn() -> T>,
}

impl<T> From<&'static str> for Assemble<T> {
  fn from(input: &'static str) -> Self {
    Self { input, _item: PhantomData }
  }
}

#[async_trait]
impl<T> Stage for Assemble<T>
where
  T: Marked + Serialize + DeserializeOwned + Send + Sync + 'static,
{
  fn name(&self) -> &'static str { "assembler" }
  fn writes(&self) -> &'static [&'static str] { &[EXAM] }

  async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StageError> {
    let items: Vec<T> = state
      .get(self.input)
      .ok_or_else(|| StageError::invalid(format!("'{}' is missing or malformed", self.input)))?;
    let exam = assemble(items);
    info!(
      target: "exam",
      part_a = exam.part_a.questions.len(),
      part_b = exam.part_b.questions.len(),
      part_c = exam.part_c.questions.len(),
      total_marks = exam.metadata.total_marks,
      "Exam assembled"
    );
    Ok(StateUpdate::new().set(EXAM, exam))
  }

  fn fallback(&self, _state: &WorkflowState) -> StateUpdate {
    StateUpdate::new().set(EXAM, assemble(Vec::<T>::new()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::agents::testing::deps_with;
  use crate::services::mock::{FailingModel, FixedRetriever, ScriptedModel};
  use crate::services::retriever::DocMetadata;

  fn q(text: &str, marks: u32) -> ExamQuestion {
    ExamQuestion {
      text: text.into(),
      metadata: QuestionMetadata { source_file: "s".into(), year: None, marks, module: None, difficulty: None },
    }
  }

  fn bank_doc(text: &str, marks: Option<u32>) -> Document {
    Document::new(text).with_metadata(DocMetadata { marks, ..Default::default() })
  }

  #[test]
  fn bucketing_thresholds() {
    let exam = assemble(vec![q("a", 5), q("b", 6), q("c", 10), q("d", 11), q("e", 1)]);
    assert_eq!(exam.part_a.questions.len(), 2);
    assert_eq!(exam.part_b.questions.len(), 2);
    assert_eq!(exam.part_c.questions.len(), 1);
    assert_eq!(exam.part_a.total_marks + exam.part_b.total_marks + exam.part_c.total_marks, exam.metadata.total_marks);
    assert_eq!(exam.metadata.total_marks, 33);
    assert_eq!(exam.metadata.total_questions, 5);
  }

  #[test]
  fn quota_stops_at_target_and_respects_tolerance() {
    let mut sel = QuotaSelector::default();
    let mut quota = ModuleQuota::new(20);
    assert_eq!(sel.offer(&mut quota, "q1", 12), Offer::Taken);
    // 12 + 14 = 26 > 25
    assert_eq!(sel.offer(&mut quota, "q2", 14), Offer::OverBudget);
    assert_eq!(sel.offer(&mut quota, "q3", 13), Offer::Taken);
    assert_eq!(quota.current, 25);
    assert_eq!(sel.offer(&mut quota, "q4", 1), Offer::Full);
  }

  #[test]
  fn dedup_is_by_prefix_and_survives_budget_rejection() {
    let mut sel = QuotaSelector::default();
    let mut small = ModuleQuota::new(5);
    let long = format!("{}{}", "x".repeat(100), " variant one");
    assert_eq!(sel.offer(&mut small, &long, 20), Offer::OverBudget);

    let mut big = ModuleQuota::new(50);
    let sibling = format!("{}{}", "x".repeat(100), " variant two");
    assert_eq!(sel.offer(&mut big, &sibling, 20), Offer::Duplicate);
    assert_eq!(big.current, 0);
  }

  #[tokio::test]
  async fn selection_fills_each_module_without_repeats() {
    let llm = ScriptedModel::new().reply(
      r#"```json
[{"module": "Learning", "marks": 10, "topics": ["hypothesis"]},
 {"module": "Bias", "marks": 10}]
```"#,
    );
    let retriever = FixedRetriever {
      docs: vec![bank_doc("Define ML.", Some(4)), bank_doc("Explain Find-S.", None), bank_doc("Explain bias.", Some(8))],
      fail: false,
    };
    let wf = workflow(&deps_with(Arc::new(llm), retriever)).unwrap();
    let out = run(&wf, "Machine learning syllabus").await;

    assert!(out.degraded.is_empty());
    assert_eq!(out.blueprint.len(), 2);
    assert_eq!(out.blueprint[1].marks, 10);
    // Learning takes 4 + 5 (default) then 8 would reach 17 > 15; Bias sees only repeats
    assert_eq!(out.exam.metadata.total_questions, 2);
    assert_eq!(out.exam.metadata.total_marks, 9);
    let first = &out.exam.part_a.questions[0];
    assert_eq!(first.metadata.module.as_deref(), Some("Learning"));
    assert_eq!(first.metadata.source_file, "Unknown");
    assert_eq!(first.metadata.year.as_deref(), Some("2023"));
  }

  #[tokio::test]
  async fn model_failure_falls_back_to_canned_blueprint() {
    let wf = workflow(&deps_with(Arc::new(FailingModel), FixedRetriever::default())).unwrap();
    let out = run(&wf, "anything").await;
    assert_eq!(out.blueprint, fallback_blueprint());
    assert_eq!(out.degraded, vec!["blueprint"]);
    assert_eq!(out.exam.metadata.total_questions, 0);
  }
}
