//! Learning-journey generation: a curriculum from a syllabus, and per-node lessons
//! with a short quiz. Gating lives in `progression`.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use super::{join_docs, Deps, CHUNK_SEPARATOR};
use crate::config::Prompts;
use crate::domain::{JourneyNode, NodeStatus, QuizQuestion};
use crate::extract::{extract_json, extract_json_as, JsonShape};
use crate::llm::{LanguageModel, ModelTier};
use crate::seeds::{fallback_curriculum, fallback_lesson, LESSON_CONTEXT_FALLBACK};
use crate::services::Retriever;
use crate::util::{fill_template, take_chars};
use crate::workflow::{Stage, StageError, StateUpdate, Workflow, WorkflowError, WorkflowState};

pub const SYLLABUS: &str = "syllabus";
pub const NODES: &str = "nodes";
pub const TITLE: &str = "title";
pub const COLLECTION: &str = "collection";
pub const LESSON_CONTEXT: &str = "lesson_context";
pub const CONTENT: &str = "content_summary";
pub const QUIZ: &str = "quiz_questions";

const SYLLABUS_PROMPT_CHARS: usize = 4000;
const CONTEXT_PROMPT_CHARS: usize = 3000;
const LESSON_CHUNKS: usize = 4;
pub const MAX_QUIZ_QUESTIONS: usize = 3;
const QUIZ_OPTIONS: usize = 4;

pub fn curriculum_workflow(deps: &Deps) -> Result<Workflow, WorkflowError> {
  Workflow::sequential(
    "journey_curriculum",
    vec![Arc::new(CurriculumStage { llm: deps.llm.clone(), prompts: deps.prompts.clone() })],
  )
}

pub fn lesson_workflow(deps: &Deps) -> Result<Workflow, WorkflowError> {
  Workflow::sequential(
    "journey_lesson",
    vec![
      Arc::new(LessonContext { retriever: deps.retriever.clone() }),
      Arc::new(LessonStage { llm: deps.llm.clone(), prompts: deps.prompts.clone() }),
    ],
  )
}

/// Ordered nodes for a new course; the first one is unlocked.
#[instrument(level = "info", skip(wf, syllabus), fields(syllabus_len = syllabus.len()))]
pub async fn generate_curriculum(wf: &Workflow, syllabus: &str) -> Vec<JourneyNode> {
  let report = wf.run(WorkflowState::new().with(SYLLABUS, syllabus)).await;
  let nodes: Vec<JourneyNode> = report.state.get_or_default(NODES);
  if nodes.is_empty() { fallback_curriculum() } else { nodes }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Lesson {
  pub content_summary: String,
  pub quiz_questions: Vec<QuizQuestion>,
}

#[instrument(level = "info", skip(wf), fields(%title, %collection))]
pub async fn generate_lesson(wf: &Workflow, title: &str, collection: &str) -> Lesson {
  let report = wf.run(WorkflowState::new().with(TITLE, title).with(COLLECTION, collection)).await;
  let (fallback_content, fallback_quiz) = fallback_lesson(title);
  Lesson {
    content_summary: report.state.get(CONTENT).unwrap_or(fallback_content),
    quiz_questions: report.state.get(QUIZ).unwrap_or(fallback_quiz),
  }
}

/// Nodes from model drafts. Missing fields get positional defaults; node 1 is unlocked.
/// Ids are unique within the course: a repeated or missing id is replaced.
pub fn nodes_from_drafts(drafts: &[Value]) -> Vec<JourneyNode> {
  let mut seen = HashSet::new();
  drafts
    .iter()
    .enumerate()
    .map(|(i, d)| {
      let field = |k: &str| d.get(k).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty());
      let id = match field("id") {
        Some(id) if !seen.contains(id) => id.to_string(),
        _ => unique_id(&seen, i),
      };
      seen.insert(id.clone());
      let mut node = JourneyNode::new(
        id,
        field("title").map(String::from).unwrap_or_else(|| format!("Topic {}", i + 1)),
        field("description").unwrap_or("Learning objective"),
      );
      if i == 0 {
        node.status = NodeStatus::Unlocked;
      }
      node
    })
    .collect()
}

fn unique_id(seen: &HashSet<String>, i: usize) -> String {
  let base = format!("node_{}", i + 1);
  let mut id = base.clone();
  let mut n = 2;
  while seen.contains(&id) {
    id = format!("{}_{}", base, n);
    n += 1;
  }
  id
}

struct CurriculumStage {
  llm: Arc<dyn LanguageModel>,
  prompts: Arc<Prompts>,
}

#[async_trait]
impl Stage for CurriculumStage {
  fn name(&self) -> &'static str { "curriculum" }
  fn writes(&self) -> &'static [&'static str] { &[NODES] }

  async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StageError> {
    let syllabus = take_chars(state.str(SYLLABUS), SYLLABUS_PROMPT_CHARS);
    let user = fill_template(&self.prompts.curriculum_user_template, &[("syllabus", &syllabus)]);
    let text = self.llm.invoke(&self.prompts.curriculum_system, &user, ModelTier::Smart).await?;
    let drafts: Vec<Value> = extract_json_as(&text, JsonShape::Array)?;
    let nodes = nodes_from_drafts(&drafts);
    if nodes.is_empty() {
      return Err(StageError::invalid("curriculum has no nodes"));
    }
    info!(target: "journey", nodes = nodes.len(), "Curriculum generated");
    Ok(StateUpdate::new().set(NODES, nodes))
  }

  fn fallback(&self, _state: &WorkflowState) -> StateUpdate {
    StateUpdate::new().set(NODES, fallback_curriculum())
  }
}

struct LessonContext {
  retriever: Arc<dyn Retriever>,
}

#[async_trait]
impl Stage for LessonContext {
  fn name(&self) -> &'static str { "lesson_context" }
  fn writes(&self) -> &'static [&'static str] { &[LESSON_CONTEXT] }

  async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StageError> {
    let docs = self.retriever.retrieve(state.str(COLLECTION), state.str(TITLE), LESSON_CHUNKS).await?;
    info!(target: "journey", docs = docs.len(), "Lesson context retrieved");
    Ok(StateUpdate::new().set(LESSON_CONTEXT, join_docs(&docs, LESSON_CHUNKS, CHUNK_SEPARATOR)))
  }

  fn fallback(&self, _state: &WorkflowState) -> StateUpdate {
    StateUpdate::new().set(LESSON_CONTEXT, LESSON_CONTEXT_FALLBACK)
  }
}

#[derive(Deserialize)]
struct QuizDraft {
  question: String,
  options: Vec<String>,
  correct_answer: Value,
}

/// Keep questions with exactly four options and an integer answer index in range;
/// at most three survive.
pub fn validate_quiz(raw: &Value) -> Vec<QuizQuestion> {
  let Some(items) = raw.as_array() else { return Vec::new() };
  items
    .iter()
    .filter_map(|item| serde_json::from_value::<QuizDraft>(item.clone()).ok())
    .filter_map(|d| {
      let idx = d.correct_answer.as_u64()? as usize;
      (d.options.len() == QUIZ_OPTIONS && idx < QUIZ_OPTIONS)
        .then(|| QuizQuestion { question: d.question, options: d.options, correct_answer: idx })
    })
    .take(MAX_QUIZ_QUESTIONS)
    .collect()
}

struct LessonStage {
  llm: Arc<dyn LanguageModel>,
  prompts: Arc<Prompts>,
}

#[async_trait]
impl Stage for LessonStage {
  fn name(&self) -> &'static str { "lesson" }
  fn writes(&self) -> &'static [&'static str] { &[CONTENT, QUIZ] }

  async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StageError> {
    let title = state.str(TITLE);
    let context = match state.str(LESSON_CONTEXT) {
      "" => "No specific context available. Generate based on general knowledge.".to_string(),
      c => take_chars(c, CONTEXT_PROMPT_CHARS),
    };
    let user = fill_template(&self.prompts.lesson_user_template, &[("title", title), ("context", &context)]);
    let text = self.llm.invoke(&self.prompts.lesson_system, &user, ModelTier::Smart).await?;
    let data = extract_json(&text, JsonShape::Object)?;

    let content = data
      .get(CONTENT)
      .and_then(Value::as_str)
      .map(String::from)
      .unwrap_or_else(|| format!("## {}\n\nContent not available.", title));
    let quiz = data.get(QUIZ).map(validate_quiz).unwrap_or_default();
    if quiz.is_empty() {
      warn!(target: "journey", %title, "Lesson has no valid quiz questions");
    }
    info!(target: "journey", %title, content_len = content.len(), questions = quiz.len(), "Lesson generated");
    Ok(StateUpdate::new().set(CONTENT, content).set(QUIZ, quiz))
  }

  fn fallback(&self, state: &WorkflowState) -> StateUpdate {
    let (content, quiz) = fallback_lesson(state.str(TITLE));
    StateUpdate::new().set(CONTENT, content).set(QUIZ, quiz)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::agents::testing::deps_with;
  use crate::services::mock::{FailingModel, FixedRetriever, ScriptedModel};
  use crate::services::Document;
  use serde_json::json;

  #[test]
  fn drafts_get_positional_defaults() {
    let nodes = nodes_from_drafts(&[json!({"title": "Sets"}), json!({"id": "n2", "title": "", "description": "Maps"})]);
    assert_eq!(nodes[0].id, "node_1");
    assert_eq!(nodes[0].status, NodeStatus::Unlocked);
    assert_eq!(nodes[0].description, "Learning objective");
    assert_eq!((nodes[1].id.as_str(), nodes[1].title.as_str()), ("n2", "Topic 2"));
    assert_eq!(nodes[1].status, NodeStatus::Locked);
  }

  #[test]
  fn repeated_ids_are_replaced() {
    let nodes = nodes_from_drafts(&[
      json!({"id": "node_1", "title": "A"}),
      json!({"id": "node_1", "title": "B"}),
      json!({"id": "node_3", "title": "C"}),
      json!({"id": "node_2", "title": "D"}),
    ]);
    let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["node_1", "node_2", "node_3", "node_2_2"]);
  }

  #[test]
  fn quiz_validation_filters_and_caps() {
    let four = json!(["a", "b", "c", "d"]);
    let raw = json!([
      {"question": "q1", "options": four, "correct_answer": 1},
      {"question": "q2", "options": ["a", "b"], "correct_answer": 0},
      {"question": "q3", "options": four, "correct_answer": "B"},
      {"question": "q4", "options": four, "correct_answer": 7},
      {"question": "q5", "options": four, "correct_answer": 0},
      {"question": "q6", "options": four, "correct_answer": 3},
      {"question": "q7", "options": four, "correct_answer": 2}
    ]);
    let quiz = validate_quiz(&raw);
    let kept: Vec<&str> = quiz.iter().map(|q| q.question.as_str()).collect();
    assert_eq!(kept, vec!["q1", "q5", "q6"]);
  }

  #[tokio::test]
  async fn lesson_from_model_json() {
    let llm = ScriptedModel::new().reply(
      r###"Sure! {"content_summary": "## Stacks\n\nLIFO.", "quiz_questions": [{"question": "Order?", "options": ["LIFO", "FIFO", "Random", "None"], "correct_answer": 0}]}"###,
    );
    let retriever = FixedRetriever { docs: vec![Document::new("A stack is LIFO.")], fail: false };
    let wf = lesson_workflow(&deps_with(Arc::new(llm), retriever)).unwrap();
    let lesson = generate_lesson(&wf, "Stacks", "user_u_default_rag").await;
    assert_eq!(lesson.quiz_questions.len(), 1);
    assert_eq!(lesson.quiz_questions[0].options[0], "LIFO");
    assert!(lesson.content_summary.starts_with("## Stacks"));
  }

  #[tokio::test]
  async fn failures_fall_back_to_canned_content() {
    let wf = lesson_workflow(&deps_with(Arc::new(FailingModel), FixedRetriever { docs: vec![], fail: true })).unwrap();
    let lesson = generate_lesson(&wf, "Queues", "c").await;
    assert_eq!(lesson, {
      let (content_summary, quiz_questions) = fallback_lesson("Queues");
      Lesson { content_summary, quiz_questions }
    });

    let wf = curriculum_workflow(&deps_with(Arc::new(FailingModel), FixedRetriever::default())).unwrap();
    assert_eq!(generate_curriculum(&wf, "syllabus").await, fallback_curriculum());
  }
}
