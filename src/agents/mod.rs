//! The orchestrators. Each submodule defines its stages and wires them into a
//! [`Workflow`]; [`Agents::build`] assembles all of them once at startup.

pub mod doubt;
pub mod examiner;
pub mod journey;
pub mod paper;
pub mod tutor;

use std::sync::Arc;

use crate::config::Prompts;
use crate::llm::LanguageModel;
use crate::services::{Document, Retriever, SpeechSynthesizer, WebSearch};
use crate::workflow::{Workflow, WorkflowError};

/// Separator between retrieved chunks in a prompt context.
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// Per-query chunk count for a learner's session collection.
pub const SESSION_K: usize = 3;

/// Collaborators shared by every stage.
#[derive(Clone)]
pub struct Deps {
  pub llm: Arc<dyn LanguageModel>,
  pub retriever: Arc<dyn Retriever>,
  pub speech: Arc<dyn SpeechSynthesizer>,
  pub search: Arc<dyn WebSearch>,
  pub prompts: Arc<Prompts>,
}

pub struct Agents {
  pub tutor: Workflow,
  pub examiner: Workflow,
  pub paper: Workflow,
  pub curriculum: Workflow,
  pub lesson: Workflow,
  pub doubt: Workflow,
}

impl Agents {
  pub fn build(deps: &Deps) -> Result<Self, WorkflowError> {
    Ok(Self {
      tutor: tutor::workflow(deps)?,
      examiner: examiner::workflow(deps)?,
      paper: paper::workflow(deps)?,
      curriculum: journey::curriculum_workflow(deps)?,
      lesson: journey::lesson_workflow(deps)?,
      doubt: doubt::workflow(deps)?,
    })
  }
}

/// Contents of the first `n` documents joined with `sep`.
pub fn join_docs(docs: &[Document], n: usize, sep: &str) -> String {
  docs.iter().take(n).map(|d| d.content.as_str()).collect::<Vec<_>>().join(sep)
}

#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use crate::services::mock::{FixedRetriever, StaticSearch, StaticSpeech};

  /// Deps around the given model; other collaborators are inert.
  pub fn deps_with(llm: Arc<dyn LanguageModel>, retriever: FixedRetriever) -> Deps {
    Deps {
      llm,
      retriever: Arc::new(retriever),
      speech: Arc::new(StaticSpeech(None)),
      search: Arc::new(StaticSearch(String::new())),
      prompts: Arc::new(Prompts::default()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::services::mock::{FailingModel, FixedRetriever};

  #[test]
  fn every_orchestrator_wires_up() {
    let deps = testing::deps_with(Arc::new(FailingModel), FixedRetriever::default());
    let agents = Agents::build(&deps).unwrap();
    assert_eq!(agents.tutor.name(), "tutor");
    assert_eq!(agents.lesson.name(), "journey_lesson");
  }

  #[test]
  fn join_takes_prefix_of_documents() {
    let docs = vec![Document::new("a"), Document::new("b"), Document::new("c")];
    assert_eq!(join_docs(&docs, 2, CHUNK_SEPARATOR), "a\n\n---\n\nb");
    assert_eq!(join_docs(&[], 2, "\n"), "");
  }
}
