//! Stage execution engine.
//!
//! A workflow is a set of named stages plus a transition table. The engine walks the
//! table from the entry stage, runs one stage at a time against the shared state and
//! merges each stage's update. Stage failures never escape: the stage's fallback
//! update is used instead and the run continues.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::state::{StateUpdate, WorkflowState};
use crate::extract::ExtractError;
use crate::llm::LlmError;
use crate::services::retriever::RetrievalError;

/// Why a stage could not produce its primary output.
#[derive(Debug, Error)]
pub enum StageError {
  #[error("model call failed: {0}")]
  Model(#[from] LlmError),
  #[error("retrieval failed: {0}")]
  Retrieval(#[from] RetrievalError),
  #[error("unusable model output: {0}")]
  Extract(#[from] ExtractError),
  #[error("{0}")]
  Invalid(String),
}

impl StageError {
  pub fn invalid(msg: impl Into<String>) -> Self {
    StageError::Invalid(msg.into())
  }
}

/// Invalid workflow wiring. Surfaces at build time, never mid-run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
  #[error("workflow '{0}' has no stages")]
  Empty(&'static str),
  #[error("duplicate stage '{0}'")]
  DuplicateStage(&'static str),
  #[error("unknown stage '{0}' referenced")]
  UnknownStage(&'static str),
  #[error("stage '{0}' has no outgoing transition")]
  MissingTransition(&'static str),
  #[error("cycle through stage '{0}'")]
  Cycle(&'static str),
  #[error("stage '{0}' is unreachable from the entry stage")]
  Unreachable(&'static str),
}

/// One unit of work. Reads the state, calls at most one collaborator, returns the
/// fields it owns.
#[async_trait]
pub trait Stage: Send + Sync {
  fn name(&self) -> &'static str;

  /// Fields this stage owns. Every run leaves all of them present in the state.
  fn writes(&self) -> &'static [&'static str];

  async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StageError>;

  /// Degraded-mode output used when `run` fails.
  fn fallback(&self, state: &WorkflowState) -> StateUpdate;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
  Stage(&'static str),
  End,
}

/// Outgoing edge of a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
  Goto(Target),
  /// Inspect one boolean-ish field and pick a target.
  Branch { field: &'static str, when_true: Target, when_false: Target },
}

impl Transition {
  fn targets(&self) -> [Target; 2] {
    match *self {
      Transition::Goto(t) => [t, Target::End],
      Transition::Branch { when_true, when_false, .. } => [when_true, when_false],
    }
  }

  fn resolve(&self, state: &WorkflowState) -> Target {
    match *self {
      Transition::Goto(t) => t,
      Transition::Branch { field, when_true, when_false } => {
        if state.is_truthy(field) { when_true } else { when_false }
      }
    }
  }
}

#[derive(Clone, Debug, Serialize)]
pub struct StageOutcome {
  pub stage: &'static str,
  pub degraded: bool,
  pub elapsed_ms: u128,
}

#[derive(Clone, Debug)]
pub struct RunReport {
  pub workflow: &'static str,
  pub state: WorkflowState,
  pub stages: Vec<StageOutcome>,
}

impl RunReport {
  pub fn executed(&self) -> Vec<&'static str> {
    self.stages.iter().map(|s| s.stage).collect()
  }

  pub fn degraded(&self) -> Vec<&'static str> {
    self.stages.iter().filter(|s| s.degraded).map(|s| s.stage).collect()
  }
}

pub struct Workflow {
  name: &'static str,
  entry: &'static str,
  stages: HashMap<&'static str, Arc<dyn Stage>>,
  transitions: HashMap<&'static str, Transition>,
}

impl std::fmt::Debug for Workflow {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Workflow")
      .field("name", &self.name)
      .field("entry", &self.entry)
      .field("transitions", &self.transitions)
      .finish()
  }
}

impl Workflow {
  pub fn builder(name: &'static str) -> WorkflowBuilder {
    WorkflowBuilder { name, entry: None, order: Vec::new(), transitions: HashMap::new() }
  }

  /// Straight pipeline: each stage flows into the next, the last one ends the run.
  pub fn sequential(name: &'static str, stages: Vec<Arc<dyn Stage>>) -> Result<Self, WorkflowError> {
    let names: Vec<&'static str> = stages.iter().map(|s| s.name()).collect();
    let mut b = Self::builder(name);
    for s in stages {
      b = b.stage_arc(s);
    }
    for pair in names.windows(2) {
      b = b.edge(pair[0], pair[1]);
    }
    if let Some(last) = names.last() {
      b = b.finish(last);
    }
    b.build()
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn writes_of(&self, stage: &str) -> &'static [&'static str] {
    self.stages.get(stage).map(|s| s.writes()).unwrap_or(&[])
  }

  #[instrument(level = "info", skip(self, state), fields(workflow = self.name))]
  pub async fn run(&self, mut state: WorkflowState) -> RunReport {
    let mut outcomes = Vec::new();
    let mut visited: HashSet<&'static str> = HashSet::new();
    let mut current = Target::Stage(self.entry);

    while let Target::Stage(name) = current {
      let Some(stage) = self.stages.get(name) else {
        warn!(target: "workflow", workflow = self.name, stage = name, "Transition to unknown stage; ending run");
        break;
      };
      if !visited.insert(name) {
        warn!(target: "workflow", workflow = self.name, stage = name, "Stage re-entry refused; ending run");
        break;
      }

      let start = Instant::now();
      let (update, mut degraded) = match stage.run(&state).await {
        Ok(u) => (u, false),
        Err(e) => {
          warn!(target: "workflow", workflow = self.name, stage = name, error = %e, "Stage failed; using fallback");
          (stage.fallback(&state), true)
        }
      };
      let update = conform(stage.as_ref(), update, &state, &mut degraded);
      state.merge(update);

      let elapsed_ms = start.elapsed().as_millis();
      debug!(target: "workflow", workflow = self.name, stage = name, degraded, elapsed_ms, "Stage finished");
      outcomes.push(StageOutcome { stage: name, degraded, elapsed_ms });

      current = match self.transitions.get(name) {
        Some(t) => t.resolve(&state),
        None => Target::End,
      };
    }

    info!(
      target: "workflow",
      workflow = self.name,
      stages = outcomes.len(),
      degraded = outcomes.iter().filter(|o| o.degraded).count(),
      "Workflow run complete"
    );
    RunReport { workflow: self.name, state, stages: outcomes }
  }
}

/// Keep only declared fields and make sure every declared field is present.
fn conform(stage: &dyn Stage, mut update: StateUpdate, state: &WorkflowState, degraded: &mut bool) -> StateUpdate {
  let writes = stage.writes();
  let mut out = StateUpdate::new();

  for extra in update.field_names() {
    if !writes.contains(&extra.as_str()) {
      warn!(target: "workflow", stage = stage.name(), field = %extra, "Dropping undeclared field");
    }
  }

  let mut fallback: Option<StateUpdate> = None;
  for &field in writes {
    let value = match update.take(field) {
      Some(v) => v,
      None => {
        *degraded = true;
        let fb = fallback.get_or_insert_with(|| stage.fallback(state));
        fb.take(field).unwrap_or(Value::Null)
      }
    };
    out.insert_raw(field, value);
  }
  out
}

pub struct WorkflowBuilder {
  name: &'static str,
  entry: Option<&'static str>,
  order: Vec<Arc<dyn Stage>>,
  transitions: HashMap<&'static str, Transition>,
}

impl WorkflowBuilder {
  pub fn stage(self, stage: impl Stage + 'static) -> Self {
    self.stage_arc(Arc::new(stage))
  }

  pub fn stage_arc(mut self, stage: Arc<dyn Stage>) -> Self {
    if self.entry.is_none() {
      self.entry = Some(stage.name());
    }
    self.order.push(stage);
    self
  }

  pub fn edge(mut self, from: &'static str, to: &'static str) -> Self {
    self.transitions.insert(from, Transition::Goto(Target::Stage(to)));
    self
  }

  pub fn finish(mut self, from: &'static str) -> Self {
    self.transitions.insert(from, Transition::Goto(Target::End));
    self
  }

  pub fn branch(mut self, from: &'static str, field: &'static str, when_true: Target, when_false: Target) -> Self {
    self.transitions.insert(from, Transition::Branch { field, when_true, when_false });
    self
  }

  pub fn build(self) -> Result<Workflow, WorkflowError> {
    let entry = self.entry.ok_or(WorkflowError::Empty(self.name))?;

    let mut stages: HashMap<&'static str, Arc<dyn Stage>> = HashMap::new();
    for s in self.order {
      let name = s.name();
      if stages.insert(name, s).is_some() {
        return Err(WorkflowError::DuplicateStage(name));
      }
    }
    if !stages.contains_key(entry) {
      return Err(WorkflowError::UnknownStage(entry));
    }
    for (&from, t) in &self.transitions {
      if !stages.contains_key(from) {
        return Err(WorkflowError::UnknownStage(from));
      }
      for target in t.targets() {
        if let Target::Stage(to) = target {
          if !stages.contains_key(to) {
            return Err(WorkflowError::UnknownStage(to));
          }
        }
      }
    }
    let mut names: Vec<&'static str> = stages.keys().copied().collect();
    names.sort_unstable();
    for name in &names {
      if !self.transitions.contains_key(name) {
        return Err(WorkflowError::MissingTransition(name));
      }
    }

    // DFS from the entry: grey = on the current path, black = fully explored
    let mut grey = HashSet::new();
    let mut black = HashSet::new();
    visit(entry, &self.transitions, &mut grey, &mut black)?;
    for name in names {
      if !black.contains(name) {
        return Err(WorkflowError::Unreachable(name));
      }
    }

    Ok(Workflow { name: self.name, entry, stages, transitions: self.transitions })
  }
}

fn visit(
  node: &'static str,
  transitions: &HashMap<&'static str, Transition>,
  grey: &mut HashSet<&'static str>,
  black: &mut HashSet<&'static str>,
) -> Result<(), WorkflowError> {
  if black.contains(node) {
    return Ok(());
  }
  if !grey.insert(node) {
    return Err(WorkflowError::Cycle(node));
  }
  if let Some(t) = transitions.get(node) {
    for target in t.targets() {
      if let Target::Stage(next) = target {
        visit(next, transitions, grey, black)?;
      }
    }
  }
  grey.remove(node);
  black.insert(node);
  Ok(())
}
