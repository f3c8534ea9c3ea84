//! Application state: settings, prompts, collaborators, the orchestrators and the
//! process-wide registries.
//!
//! This module owns:
//!   - the optional model client (no credentials means model-backed routes answer 503)
//!   - the retriever (HTTP vector store when RETRIEVER_URL is set, otherwise an
//!     in-memory store seeded with the built-in exam bank plus TOML documents)
//!   - the course and job registries

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::agents::{Agents, Deps};
use crate::config::{load_agent_config_from_env, AgentConfig, Prompts, Settings};
use crate::errors::ApiError;
use crate::jobs::JobRegistry;
use crate::llm::{ChatClient, LanguageModel};
use crate::progression::CourseRegistry;
use crate::seeds::seed_documents;
use crate::services::{
  Document, DuckDuckGoSearch, FfmpegAssembler, FootageSource, HttpRetriever, MemoryRetriever, PexelsFootage,
  Retriever, SarvamSpeech, SpeechSynthesizer, VideoAssembler, WebSearch,
};
use crate::video::LectureGenerator;
use crate::workflow::WorkflowError;

/// External collaborators other than the model.
#[derive(Clone)]
pub struct Collaborators {
  pub retriever: Arc<dyn Retriever>,
  pub speech: Arc<dyn SpeechSynthesizer>,
  pub footage: Arc<dyn FootageSource>,
  pub search: Arc<dyn WebSearch>,
  pub assembler: Arc<dyn VideoAssembler>,
}

pub struct AppState {
  pub settings: Settings,
  pub retriever: Arc<dyn Retriever>,
  pub speech: Arc<dyn SpeechSynthesizer>,
  agents: Option<Arc<Agents>>,
  lectures: Option<Arc<LectureGenerator>>,
  pub courses: CourseRegistry,
  pub jobs: JobRegistry,
}

impl AppState {
  /// Build state from the environment and the optional agent TOML.
  #[instrument(level = "info", skip_all)]
  pub async fn from_env() -> Result<Self, WorkflowError> {
    let settings = Settings::from_env();
    let cfg = load_agent_config_from_env().unwrap_or_default();

    let llm: Option<Arc<dyn LanguageModel>> = match ChatClient::from_settings(&settings.llm) {
      Some(c) => {
        info!(
          target: "edusynth_backend",
          base_url = %c.base_url,
          fast_model = %c.fast_model,
          smart_model = %c.smart_model,
          keys = c.key_count(),
          "Model client enabled."
        );
        Some(Arc::new(c))
      }
      None => {
        warn!(target: "edusynth_backend", "No GROQ_API_KEY(S) set. Model-backed routes will answer 503.");
        None
      }
    };

    let speech = SarvamSpeech::new(settings.sarvam_api_key.clone(), &settings.sarvam_base_url);
    if !speech.is_configured() {
      warn!(target: "edusynth_backend", "No SARVAM_API_KEY set. Audio answers and video lectures will fail.");
    }
    let collab = Collaborators {
      retriever: build_retriever(&settings, &cfg).await,
      speech: Arc::new(speech),
      footage: Arc::new(PexelsFootage::new(settings.pexels_api_key.clone())),
      search: Arc::new(DuckDuckGoSearch::new()),
      assembler: Arc::new(FfmpegAssembler::new(&settings.ffmpeg_bin, &settings.ffprobe_bin)),
    };
    Self::assemble(settings, cfg.prompts, llm, collab)
  }

  /// Wire orchestrators around the given collaborators.
  pub fn assemble(
    settings: Settings,
    prompts: Prompts,
    llm: Option<Arc<dyn LanguageModel>>,
    collab: Collaborators,
  ) -> Result<Self, WorkflowError> {
    let prompts = Arc::new(prompts);
    let (agents, lectures) = match llm {
      Some(llm) => {
        let deps = Deps {
          llm: llm.clone(),
          retriever: collab.retriever.clone(),
          speech: collab.speech.clone(),
          search: collab.search.clone(),
          prompts: prompts.clone(),
        };
        let lectures = LectureGenerator {
          llm,
          prompts: prompts.clone(),
          speech: collab.speech.clone(),
          footage: collab.footage,
          assembler: collab.assembler,
          output_dir: settings.video_output_dir.clone(),
        };
        (Some(Arc::new(Agents::build(&deps)?)), Some(Arc::new(lectures)))
      }
      None => (None, None),
    };
    Ok(Self {
      settings,
      retriever: collab.retriever,
      speech: collab.speech,
      agents,
      lectures,
      courses: CourseRegistry::new(),
      jobs: JobRegistry::new(),
    })
  }

  pub fn agents(&self) -> Result<&Agents, ApiError> {
    self.agents.as_deref().ok_or_else(ApiError::model_unavailable)
  }

  pub fn lectures(&self) -> Result<Arc<LectureGenerator>, ApiError> {
    self.lectures.clone().ok_or_else(ApiError::model_unavailable)
  }
}

async fn build_retriever(settings: &Settings, cfg: &AgentConfig) -> Arc<dyn Retriever> {
  if let Some(url) = &settings.retriever_url {
    match HttpRetriever::new(url) {
      Ok(r) => {
        info!(target: "edusynth_backend", %url, "Using HTTP retriever.");
        return Arc::new(r);
      }
      Err(e) => error!(target: "edusynth_backend", %url, error = %e, "HTTP retriever unusable; using in-memory store."),
    }
  }
  let mem = MemoryRetriever::new();
  for (collection, doc) in seed_documents() {
    mem.add(collection, doc).await;
  }
  for d in &cfg.documents {
    mem.add(&d.collection, Document::new(d.content.clone()).with_metadata(d.metadata.clone())).await;
  }
  info!(target: "edusynth_backend", bank_documents = cfg.documents.len(), "Using in-memory retriever.");
  Arc::new(mem)
}

#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use crate::services::mock::{NoFootage, RecordingAssembler, StaticSearch, StaticSpeech};

  /// State around the given model and retriever; other collaborators are inert.
  pub fn state_with(llm: Option<Arc<dyn LanguageModel>>, retriever: Arc<dyn Retriever>) -> AppState {
    let settings = Settings {
      video_output_dir: std::env::temp_dir().join(format!("edusynth-state-{}", uuid::Uuid::new_v4())),
      ..Settings::default()
    };
    let collab = Collaborators {
      retriever,
      speech: Arc::new(StaticSpeech(None)),
      footage: Arc::new(NoFootage),
      search: Arc::new(StaticSearch(String::new())),
      assembler: Arc::new(RecordingAssembler::default()),
    };
    AppState::assemble(settings, Prompts::default(), llm, collab).unwrap()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::services::mock::{FailingModel, FixedRetriever};
  use crate::services::EXAM_COLLECTION;

  #[test]
  fn without_model_orchestrators_are_unavailable() {
    let state = testing::state_with(None, Arc::new(FixedRetriever::default()));
    assert_eq!(state.agents().err(), Some(ApiError::model_unavailable()));
    assert!(state.lectures().is_err());

    let llm: Arc<dyn LanguageModel> = Arc::new(FailingModel);
    let state = testing::state_with(Some(llm), Arc::new(FixedRetriever::default()));
    assert!(state.agents().is_ok());
  }

  #[tokio::test]
  async fn in_memory_retriever_is_seeded_with_bank_and_config() {
    let cfg: AgentConfig = toml::from_str(
      r#"
      [[documents]]
      collection = "user_u_s_rag"
      content = "Photosynthesis turns light into sugar."
      "#,
    )
    .unwrap();
    let retriever = build_retriever(&Settings::default(), &cfg).await;
    let docs = retriever.retrieve("user_u_s_rag", "photosynthesis light", 3).await.unwrap();
    assert_eq!(docs.len(), 1);
    let bank = retriever.retrieve(EXAM_COLLECTION, "algorithm", 10).await.unwrap();
    assert!(!bank.is_empty());
  }
}
