//! Doubt solver: answer a learner's question from their own material, topping up
//! with web results when that material is thin.
//!
//!   doubt_context -(context_sufficient)-> doubt_answer
//!                 \-(otherwise)-> web_search -> doubt_answer

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument};

use super::{join_docs, Deps, SESSION_K};
use crate::config::Prompts;
use crate::llm::{LanguageModel, ModelTier};
use crate::seeds::DOUBT_FALLBACK_ANSWER;
use crate::services::{Retriever, WebSearch};
use crate::util::fill_template;
use crate::workflow::{Stage, StageError, StateUpdate, Target, Workflow, WorkflowError, WorkflowState};

pub const DOUBT: &str = "doubt";
pub const COLLECTION: &str = "collection";
/// Caller-supplied context; skips retrieval when present.
pub const CONTEXT_OVERRIDE: &str = "context_override";
pub const CONTEXT: &str = "rag_context";
pub const SUFFICIENT: &str = "context_sufficient";
pub const WEB: &str = "web_results";
pub const ANSWER: &str = "answer";

/// Context shorter than this (trimmed, in chars) triggers a web search.
pub const MIN_CONTEXT_CHARS: usize = 100;
const WEB_RESULTS: usize = 5;

const NO_UPLOADS: &str = "No materials uploaded for this session.";
const NO_WEB: &str = "No web search performed - context was sufficient.";

pub fn workflow(deps: &Deps) -> Result<Workflow, WorkflowError> {
  Workflow::builder("doubt")
    .stage(DoubtContext { retriever: deps.retriever.clone() })
    .stage(WebSearchStage { search: deps.search.clone() })
    .stage(DoubtAnswer { llm: deps.llm.clone(), prompts: deps.prompts.clone() })
    .branch("doubt_context", SUFFICIENT, Target::Stage("doubt_answer"), Target::Stage("web_search"))
    .edge("web_search", "doubt_answer")
    .finish("doubt_answer")
    .build()
}

#[derive(Clone, Debug, Serialize)]
pub struct DoubtOutcome {
  pub answer: String,
  pub web_search_used: bool,
}

pub fn is_context_sufficient(context: &str) -> bool {
  context.trim().chars().count() >= MIN_CONTEXT_CHARS
}

#[instrument(level = "info", skip(wf, doubt, context_override), fields(doubt_len = doubt.len(), %collection))]
pub async fn run(wf: &Workflow, doubt: &str, collection: &str, context_override: Option<String>) -> DoubtOutcome {
  let mut state = WorkflowState::new().with(DOUBT, doubt).with(COLLECTION, collection);
  if let Some(c) = context_override {
    state.set(CONTEXT_OVERRIDE, c);
  }
  let report = wf.run(state).await;
  DoubtOutcome {
    answer: report.state.str(ANSWER).to_string(),
    web_search_used: report.executed().contains(&"web_search"),
  }
}

struct DoubtContext {
  retriever: Arc<dyn Retriever>,
}

#[async_trait]
impl Stage for DoubtContext {
  fn name(&self) -> &'static str { "doubt_context" }
  fn writes(&self) -> &'static [&'static str] { &[CONTEXT, SUFFICIENT] }

  async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StageError> {
    let context = match state.get::<String>(CONTEXT_OVERRIDE) {
      Some(c) => c,
      None => {
        let docs = self.retriever.retrieve(state.str(COLLECTION), state.str(DOUBT), SESSION_K).await?;
        join_docs(&docs, docs.len(), "\n\n")
      }
    };
    let sufficient = is_context_sufficient(&context);
    info!(target: "doubt", context_len = context.len(), sufficient, "Doubt context ready");
    Ok(StateUpdate::new().set(CONTEXT, context).set(SUFFICIENT, sufficient))
  }

  fn fallback(&self, _state: &WorkflowState) -> StateUpdate {
    StateUpdate::new().set(CONTEXT, "").set(SUFFICIENT, false)
  }
}

struct WebSearchStage {
  search: Arc<dyn WebSearch>,
}

#[async_trait]
impl Stage for WebSearchStage {
  fn name(&self) -> &'static str { "web_search" }
  fn writes(&self) -> &'static [&'static str] { &[WEB] }

  async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StageError> {
    let results = self.search.search(state.str(DOUBT), WEB_RESULTS).await;
    info!(target: "doubt", results_len = results.len(), "Web search done");
    Ok(StateUpdate::new().set(WEB, results))
  }

  fn fallback(&self, _state: &WorkflowState) -> StateUpdate {
    StateUpdate::new().set(WEB, "")
  }
}

struct DoubtAnswer {
  llm: Arc<dyn LanguageModel>,
  prompts: Arc<Prompts>,
}

#[async_trait]
impl Stage for DoubtAnswer {
  fn name(&self) -> &'static str { "doubt_answer" }
  fn writes(&self) -> &'static [&'static str] { &[ANSWER] }

  async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StageError> {
    let context = match state.str(CONTEXT) {
      "" => NO_UPLOADS,
      c => c,
    };
    let web = match state.str(WEB) {
      "" => NO_WEB,
      w => w,
    };
    let user = fill_template(
      &self.prompts.doubt_user_template,
      &[("context", context), ("web", web), ("doubt", state.str(DOUBT))],
    );
    let answer = self.llm.invoke(&self.prompts.doubt_system, &user, ModelTier::Smart).await?;
    if answer.trim().is_empty() {
      return Err(StageError::invalid("empty answer"));
    }
    Ok(StateUpdate::new().set(ANSWER, answer))
  }

  fn fallback(&self, _state: &WorkflowState) -> StateUpdate {
    StateUpdate::new().set(ANSWER, DOUBT_FALLBACK_ANSWER)
  }
}
