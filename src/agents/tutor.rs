//! Tutor orchestrator.
//!
//!   intent_router -> planner -> retriever -> generator -(generate_audio)-> audio
//!
//! The router is deterministic; the planner and generator call the model; the
//! retriever grounds the answer in the learner's own session collection.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::{Deps, CHUNK_SEPARATOR, SESSION_K};
use crate::classify::{classify, Intent, DEFAULT_LANGUAGE};
use crate::config::Prompts;
use crate::domain::Flashcard;
use crate::extract::{extract_fenced, strip_fenced};
use crate::llm::{LanguageModel, ModelTier};
use crate::seeds::TUTOR_FALLBACK_RESPONSE;
use crate::services::{Retriever, SpeechSynthesizer};
use crate::util::fill_template;
use crate::workflow::{Stage, StageError, StateUpdate, Target, Workflow, WorkflowError, WorkflowState};

// inputs
pub const QUERY: &str = "query";
pub const EXPLICIT_AUDIO: &str = "explicit_audio";
pub const REQUEST_LANGUAGE: &str = "request_language";
pub const COLLECTION: &str = "collection";
// outputs
pub const INTENT: &str = "intent";
pub const LANGUAGE: &str = "language_code";
pub const GENERATE_AUDIO: &str = "generate_audio";
pub const PLAN: &str = "plan";
pub const CONTEXT: &str = "context";
pub const RESPONSE: &str = "response";
pub const MINDMAP: &str = "mindmap_source";
pub const FLASHCARDS: &str = "flashcards";
pub const AUDIO: &str = "audio_base64";

/// Unique chunks kept for the generator.
const MAX_CHUNKS: usize = 5;
/// Plan items that get their own retrieval, and chunks taken from each.
const PLAN_QUERIES: usize = 2;
const PLAN_CHUNKS: usize = 2;

const NO_CONTEXT: &str = "No relevant context found in uploaded documents.";

pub fn workflow(deps: &Deps) -> Result<Workflow, WorkflowError> {
  Workflow::builder("tutor")
    .stage(IntentRouter)
    .stage(Planner { llm: deps.llm.clone(), prompts: deps.prompts.clone() })
    .stage(ContextRetriever { retriever: deps.retriever.clone() })
    .stage(Generator { llm: deps.llm.clone(), prompts: deps.prompts.clone() })
    .stage(AudioStage { speech: deps.speech.clone() })
    .edge("intent_router", "planner")
    .edge("planner", "retriever")
    .edge("retriever", "generator")
    .branch("generator", GENERATE_AUDIO, Target::Stage("audio"), Target::End)
    .finish("audio")
    .build()
}

#[derive(Clone, Debug)]
pub struct TutorInput {
  pub query: String,
  pub explicit_audio: bool,
  /// Caller's preferred language; used when the query names none.
  pub language_code: String,
  pub collection: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct TutorOutcome {
  pub intent: Intent,
  pub language_code: String,
  pub plan: Vec<String>,
  pub response: String,
  pub mindmap_source: Option<String>,
  pub flashcards: Option<Vec<Flashcard>>,
  pub audio_base64: Option<String>,
  pub degraded: Vec<&'static str>,
}

#[instrument(level = "info", skip(wf, input), fields(query_len = input.query.len(), collection = %input.collection))]
pub async fn run(wf: &Workflow, input: TutorInput) -> TutorOutcome {
  let state = WorkflowState::new()
    .with(QUERY, &input.query)
    .with(EXPLICIT_AUDIO, input.explicit_audio)
    .with(REQUEST_LANGUAGE, &input.language_code)
    .with(COLLECTION, &input.collection);
  let report = wf.run(state).await;
  let s = &report.state;
  TutorOutcome {
    intent: s.get(INTENT).unwrap_or_default(),
    language_code: s.get(LANGUAGE).unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
    plan: s.get_or_default(PLAN),
    response: s.str(RESPONSE).to_string(),
    mindmap_source: s.get(MINDMAP),
    flashcards: s.get(FLASHCARDS),
    audio_base64: s.get(AUDIO),
    degraded: report.degraded(),
  }
}

struct IntentRouter;

impl IntentRouter {
  fn language_for(state: &WorkflowState, detected: Option<String>) -> String {
    detected
      .or_else(|| Some(state.str(REQUEST_LANGUAGE).to_string()).filter(|l| !l.is_empty()))
      .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
  }
}

#[async_trait]
impl Stage for IntentRouter {
  fn name(&self) -> &'static str { "intent_router" }
  fn writes(&self) -> &'static [&'static str] { &[INTENT, LANGUAGE, GENERATE_AUDIO] }

  async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StageError> {
    let explicit = state.get::<bool>(EXPLICIT_AUDIO).unwrap_or(false);
    let c = classify(state.str(QUERY), explicit);
    let detected = c.language_detected.then(|| c.language_code.clone());
    let language = Self::language_for(state, detected);
    info!(target: "tutor", intent = c.intent.as_str(), %language, wants_audio = c.wants_audio, "Query classified");
    Ok(StateUpdate::new().set(INTENT, c.intent).set(LANGUAGE, language).set(GENERATE_AUDIO, c.wants_audio))
  }

  fn fallback(&self, state: &WorkflowState) -> StateUpdate {
    StateUpdate::new()
      .set(INTENT, Intent::Explain)
      .set(LANGUAGE, Self::language_for(state, None))
      .set(GENERATE_AUDIO, state.get::<bool>(EXPLICIT_AUDIO).unwrap_or(false))
  }
}

struct Planner {
  llm: Arc<dyn LanguageModel>,
  prompts: Arc<Prompts>,
}

/// Comma-separated model output into trimmed, non-empty items.
pub fn parse_plan(text: &str) -> Vec<String> {
  text.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}

#[async_trait]
impl Stage for Planner {
  fn name(&self) -> &'static str { "planner" }
  fn writes(&self) -> &'static [&'static str] { &[PLAN] }

  async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StageError> {
    let text = self.llm
      .invoke(&self.prompts.planner_system, &format!("Topic: {}", state.str(QUERY)), ModelTier::Fast)
      .await?;
    let plan = parse_plan(&text);
    if plan.is_empty() {
      return Err(StageError::invalid("planner returned no sub-topics"));
    }
    debug!(target: "tutor", items = plan.len(), "Plan ready");
    Ok(StateUpdate::new().set(PLAN, plan))
  }

  fn fallback(&self, state: &WorkflowState) -> StateUpdate {
    let query = state.str(QUERY);
    let plan: Vec<&str> = if query.is_empty() { vec![] } else { vec![query] };
    StateUpdate::new().set(PLAN, plan)
  }
}

struct ContextRetriever {
  retriever: Arc<dyn Retriever>,
}

#[async_trait]
impl Stage for ContextRetriever {
  fn name(&self) -> &'static str { "retriever" }
  fn writes(&self) -> &'static [&'static str] { &[CONTEXT] }

  async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StageError> {
    let collection = state.str(COLLECTION);
    let mut chunks: Vec<String> = self.retriever
      .retrieve(collection, state.str(QUERY), SESSION_K)
      .await?
      .into_iter()
      .map(|d| d.content)
      .collect();

    let plan: Vec<String> = state.get_or_default(PLAN);
    for sub in plan.iter().take(PLAN_QUERIES) {
      match self.retriever.retrieve(collection, sub, SESSION_K).await {
        Ok(docs) => chunks.extend(docs.into_iter().take(PLAN_CHUNKS).map(|d| d.content)),
        Err(e) => debug!(target: "tutor", subtopic = %sub, error = %e, "Sub-topic retrieval skipped"),
      }
    }

    let mut seen = HashSet::new();
    let unique: Vec<String> = chunks.into_iter().filter(|c| seen.insert(c.clone())).collect();
    info!(target: "tutor", %collection, unique = unique.len(), "Context retrieved");
    let context = unique.into_iter().take(MAX_CHUNKS).collect::<Vec<_>>().join(CHUNK_SEPARATOR);
    Ok(StateUpdate::new().set(CONTEXT, context))
  }

  fn fallback(&self, _state: &WorkflowState) -> StateUpdate {
    StateUpdate::new().set(CONTEXT, "")
  }
}

/// Generator output split into prose and structured extras.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedAnswer {
  pub response: String,
  pub mindmap_source: Option<String>,
  pub flashcards: Option<Vec<Flashcard>>,
}

static LEAD_IN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Here is the .*?:").expect("static regex"));
static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("static regex"));

/// Pull the mermaid block and the flashcard JSON out of a generated answer and tidy
/// what remains. A JSON block that fails to parse stays in the prose.
pub fn split_generated(text: &str) -> GeneratedAnswer {
  let mut content = text.to_string();

  let mindmap_source = extract_fenced(&content, "mermaid").ok();
  if mindmap_source.is_some() {
    content = strip_fenced(&content, "mermaid");
  }

  let mut flashcards = None;
  if let Ok(raw) = extract_fenced(&content, "json") {
    match serde_json::from_str::<Value>(&raw) {
      Ok(data) => {
        let cards = match data {
          Value::Object(mut o) => o.remove("flashcards").unwrap_or(Value::Array(vec![])),
          arr @ Value::Array(_) => arr,
          _ => Value::Array(vec![]),
        };
        flashcards = Some(serde_json::from_value::<Vec<Flashcard>>(cards).unwrap_or_default());
        content = strip_fenced(&content, "json");
      }
      Err(e) => warn!(target: "tutor", error = %e, "Flashcard block is not valid JSON"),
    }
  }

  let content = LEAD_IN.replace_all(&content, "");
  let content = BLANK_RUN.replace_all(content.trim(), "\n\n");
  GeneratedAnswer { response: content.into_owned(), mindmap_source, flashcards }
}

struct Generator {
  llm: Arc<dyn LanguageModel>,
  prompts: Arc<Prompts>,
}

impl Generator {
  fn task(&self, intent: Intent) -> &str {
    match intent {
      Intent::Diagram => &self.prompts.tutor_diagram_task,
      Intent::Flashcards => &self.prompts.tutor_flashcards_task,
      Intent::Quiz => &self.prompts.tutor_quiz_task,
      Intent::Audio | Intent::Video | Intent::Explain => &self.prompts.tutor_explain_task,
    }
  }
}

#[async_trait]
impl Stage for Generator {
  fn name(&self) -> &'static str { "generator" }
  fn writes(&self) -> &'static [&'static str] { &[RESPONSE, MINDMAP, FLASHCARDS] }

  async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StageError> {
    let intent: Intent = state.get(INTENT).unwrap_or_default();
    let system = format!("{}\n\n{}", self.prompts.tutor_base_system, self.task(intent));
    let context = match state.str(CONTEXT) {
      "" => NO_CONTEXT,
      c => c,
    };
    let user = fill_template(&self.prompts.tutor_user_template, &[("context", context), ("query", state.str(QUERY))]);

    let text = self.llm.invoke(&system, &user, ModelTier::Smart).await?;
    let out = split_generated(&text);
    info!(
      target: "tutor",
      intent = intent.as_str(),
      response_len = out.response.len(),
      mindmap = out.mindmap_source.is_some(),
      flashcards = out.flashcards.as_ref().map(Vec::len).unwrap_or(0),
      "Answer generated"
    );
    Ok(StateUpdate::new()
      .set(RESPONSE, out.response)
      .set(MINDMAP, out.mindmap_source)
      .set(FLASHCARDS, out.flashcards))
  }

  fn fallback(&self, _state: &WorkflowState) -> StateUpdate {
    StateUpdate::new()
      .set(RESPONSE, TUTOR_FALLBACK_RESPONSE)
      .set(MINDMAP, Value::Null)
      .set(FLASHCARDS, Value::Null)
  }
}

struct AudioStage {
  speech: Arc<dyn SpeechSynthesizer>,
}

#[async_trait]
impl Stage for AudioStage {
  fn name(&self) -> &'static str { "audio" }
  fn writes(&self) -> &'static [&'static str] { &[AUDIO] }

  async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StageError> {
    let language = state.get::<String>(LANGUAGE).unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
    let audio = self.speech
      .synthesize(state.str(RESPONSE), &language)
      .await
      .ok_or_else(|| StageError::invalid("speech synthesis produced no audio"))?;
    Ok(StateUpdate::new().set(AUDIO, audio))
  }

  fn fallback(&self, _state: &WorkflowState) -> StateUpdate {
    StateUpdate::new().set(AUDIO, Value::Null)
  }
}
