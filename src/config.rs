//! Runtime configuration: environment settings plus the optional agent TOML
//! (prompt overrides + a seed document bank for the in-memory retriever).
//!
//! See `Settings`, `AgentConfig` and `Prompts` for the expected schema.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::{error, info};

use crate::services::retriever::DocMetadata;

/// Model endpoint settings.
#[derive(Clone, Debug)]
pub struct LlmSettings {
  /// Raw key list; comma, semicolon or newline separated.
  pub api_keys: String,
  pub base_url: String,
  pub fast_model: String,
  pub smart_model: String,
  pub best_model: String,
  pub max_attempts: u32,
  pub timeout_secs: u64,
}

impl Default for LlmSettings {
  fn default() -> Self {
    Self {
      api_keys: String::new(),
      base_url: "https://api.groq.com/openai/v1".into(),
      fast_model: "llama-3.1-8b-instant".into(),
      smart_model: "llama-3.3-70b-versatile".into(),
      best_model: "openai/gpt-oss-120b".into(),
      max_attempts: 3,
      timeout_secs: 60,
    }
  }
}

/// Everything read from the process environment at startup.
#[derive(Clone, Debug)]
pub struct Settings {
  pub port: u16,
  pub cors_origins: Vec<String>,
  pub llm: LlmSettings,
  pub sarvam_api_key: Option<String>,
  pub sarvam_base_url: String,
  pub pexels_api_key: Option<String>,
  pub retriever_url: Option<String>,
  pub ffmpeg_bin: String,
  pub ffprobe_bin: String,
  pub video_output_dir: PathBuf,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      port: 3000,
      cors_origins: Vec::new(),
      llm: LlmSettings::default(),
      sarvam_api_key: None,
      sarvam_base_url: "https://api.sarvam.ai".into(),
      pexels_api_key: None,
      retriever_url: None,
      ffmpeg_bin: "ffmpeg".into(),
      ffprobe_bin: "ffprobe".into(),
      video_output_dir: PathBuf::from("generated_videos"),
    }
  }
}

fn env_opt(name: &str) -> Option<String> {
  std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Settings {
  pub fn from_env() -> Self {
    let d = Settings::default();
    // GROQ_API_KEYS (pool) wins over the single GROQ_API_KEY
    let api_keys = env_opt("GROQ_API_KEYS").or_else(|| env_opt("GROQ_API_KEY")).unwrap_or_default();
    let llm = LlmSettings {
      api_keys,
      base_url: env_opt("LLM_BASE_URL").unwrap_or(d.llm.base_url),
      fast_model: env_opt("LLM_FAST_MODEL").unwrap_or(d.llm.fast_model),
      smart_model: env_opt("LLM_SMART_MODEL").unwrap_or(d.llm.smart_model),
      best_model: env_opt("LLM_BEST_MODEL").unwrap_or(d.llm.best_model),
      max_attempts: env_opt("LLM_MAX_ATTEMPTS").and_then(|v| v.parse().ok()).unwrap_or(d.llm.max_attempts),
      timeout_secs: d.llm.timeout_secs,
    };
    let ffmpeg_bin = env_opt("FFMPEG_BIN").unwrap_or(d.ffmpeg_bin);
    Self {
      port: env_opt("PORT").and_then(|p| p.parse().ok()).unwrap_or(d.port),
      cors_origins: env_opt("CORS_ORIGINS").map(|v| parse_list(&v)).unwrap_or_default(),
      llm,
      sarvam_api_key: env_opt("SARVAM_API_KEY"),
      sarvam_base_url: env_opt("SARVAM_BASE_URL").unwrap_or(d.sarvam_base_url),
      pexels_api_key: env_opt("PEXELS_API_KEY"),
      retriever_url: env_opt("RETRIEVER_URL"),
      ffprobe_bin: env_opt("FFPROBE_BIN").unwrap_or(d.ffprobe_bin),
      ffmpeg_bin,
      video_output_dir: env_opt("VIDEO_OUTPUT_DIR").map(PathBuf::from).unwrap_or(d.video_output_dir),
    }
  }
}

fn parse_list(raw: &str) -> Vec<String> {
  raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AgentConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub documents: Vec<DocumentCfg>,
}

/// Seed document accepted in TOML; lands in the in-memory retriever.
#[derive(Clone, Debug, Deserialize)]
pub struct DocumentCfg {
  pub collection: String,
  pub content: String,
  #[serde(default, flatten)]
  pub metadata: DocMetadata,
}

/// Prompts used by the agents. Any subset can be overridden in TOML.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  // Tutor
  pub planner_system: String,
  pub tutor_base_system: String,
  pub tutor_explain_task: String,
  pub tutor_diagram_task: String,
  pub tutor_flashcards_task: String,
  pub tutor_quiz_task: String,
  pub tutor_user_template: String,
  // Examiner
  pub blueprint_system: String,
  pub blueprint_user_template: String,
  pub structure_user_template: String,
  pub topics_user_template: String,
  // Journey
  pub curriculum_system: String,
  pub curriculum_user_template: String,
  pub lesson_system: String,
  pub lesson_user_template: String,
  // Doubt
  pub doubt_system: String,
  pub doubt_user_template: String,
  // Video
  pub lecture_system: String,
  pub lecture_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      planner_system: "You are a curriculum planner for an AI tutor. Break the topic into 3-5 key sub-topics for a short lesson. Return ONLY a comma-separated list of concise sub-topics (2-5 words each), ordered for learning. No numbering, no explanations.".into(),
      tutor_base_system: "You are EduSynth, an expert AI tutor.\nRules:\n1. Only use information from the provided CONTEXT.\n2. If the context has nothing relevant, say: \"I don't have information about this in your uploaded documents. Please upload relevant materials.\"\n3. Be conversational, like a helpful teacher.\n4. Keep responses focused.".into(),
      tutor_explain_task: "Explain the topic clearly: a 1-2 sentence overview, the key concepts in order, examples from the context, then a short takeaway.".into(),
      tutor_diagram_task: "Generate a Mermaid mindmap. Output one short intro sentence, then a ```mermaid block starting with `mindmap` and a root((Topic)) node with 3-4 branches of 2-3 concise details each.".into(),
      tutor_flashcards_task: "Generate exactly 5 study flashcards. Output one intro sentence, then a ```json block shaped as {\"flashcards\": [{\"id\": \"1\", \"question\": \"...\", \"answer\": \"...\"}]}.".into(),
      tutor_quiz_task: "Generate 3-5 multiple-choice questions from the context. For each: **Qn: question**, options A) to D), then [Correct]: letter.".into(),
      tutor_user_template: "CONTEXT (from the learner's documents):\n{context}\n\nUSER QUERY: {query}\n\nGenerate your response now:".into(),
      blueprint_system: "You are an exam paper designer. Analyse the syllabus and produce an exam blueprint: 4-5 modules, 15-30 marks each, total exactly 100, 2-3 testable topics per module. Output ONLY a JSON array of {\"module\": string, \"marks\": number, \"topics\": [string]}.".into(),
      blueprint_user_template: "Analyse this syllabus and create an exam blueprint:\n\nSYLLABUS:\n{syllabus}\n\nGenerate the JSON blueprint now:".into(),
      structure_user_template: "Analyse the structure of this exam paper. Return ONLY JSON: {\"structure_type\": \"unit_wise\", \"unit_count\": int, \"subquestion_labels\": [string], \"has_or_choice\": bool, \"marks_per_subquestion\": int}.\n\nReference text:\n{reference}".into(),
      topics_user_template: "Break this syllabus into {count} distinct unit topics. Return a numbered list, one topic per line.\n\nSyllabus:\n{syllabus}".into(),
      curriculum_system: "You are a curriculum designer. Create a progressive learning path of 5-7 nodes, foundations first, capstone last, each completable in 10-15 minutes. Output ONLY a JSON array of {\"id\": \"node_1\", \"title\": \"2-5 word title\", \"description\": \"one-sentence objective\"}.".into(),
      curriculum_user_template: "Design a learning path for this syllabus:\n\nSYLLABUS:\n{syllabus}\n\nGenerate the learning path JSON now:".into(),
      lesson_system: "You are EduSynth, creating micro-learning content. Write a 3-4 paragraph Markdown lesson and exactly 3 MCQs with 4 options each. Output ONLY JSON: {\"content_summary\": string, \"quiz_questions\": [{\"question\": string, \"options\": [4 strings], \"correct_answer\": index 0-3}]}.".into(),
      lesson_user_template: "Create a lesson for this topic:\n\nTOPIC: {title}\n\nREFERENCE CONTEXT:\n{context}\n\nGenerate the lesson and quiz JSON now:".into(),
      doubt_system: "You are Vidya Ma'am, a warm and patient teacher. Acknowledge the doubt, explain step by step with an everyday example, say what you would write on the blackboard, check understanding and end with encouragement. Match the student's language. Prefer UPLOADED_CONTEXT, supplement with WEB_SEARCH_RESULTS.".into(),
      doubt_user_template: "## UPLOADED_CONTEXT:\n{context}\n\n## WEB_SEARCH_RESULTS:\n{web}\n\n## STUDENT_DOUBT:\n{doubt}".into(),
      lecture_system: "You are an expert educational content creator. Output only valid JSON.".into(),
      lecture_user_template: "Create a {minutes}-minute educational video lecture script about: {topic}\n{context}\nOutput ONLY JSON: {\"title\": string, \"scenes\": [{\"visual\": searchable stock-footage terms, \"narration\": 2-3 sentences}]}. Use 4-6 scenes and simple language.".into(),
    }
  }
}

/// Attempt to load `AgentConfig` from AGENT_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_agent_config_from_env() -> Option<AgentConfig> {
  let path = std::env::var("AGENT_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<AgentConfig>(&s) {
      Ok(cfg) => {
        info!(target: "edusynth_backend", %path, documents = cfg.documents.len(), "Loaded agent config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "edusynth_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "edusynth_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partial_prompt_override_keeps_defaults() {
    let cfg: AgentConfig = toml::from_str(
      r#"
      [prompts]
      planner_system = "custom planner"

      [[documents]]
      collection = "exam_questions"
      content = "Explain the Find-S algorithm."
      marks = 8
      source_file = "CS36_2022.pdf"
      "#,
    )
    .unwrap();
    assert_eq!(cfg.prompts.planner_system, "custom planner");
    assert_eq!(cfg.prompts.doubt_system, Prompts::default().doubt_system);
    assert_eq!(cfg.documents.len(), 1);
    assert_eq!(cfg.documents[0].metadata.marks, Some(8));
    assert_eq!(cfg.documents[0].metadata.source_file.as_deref(), Some("CS36_2022.pdf"));
  }

  #[test]
  fn cors_list_parsing() {
    assert_eq!(parse_list(" http://a , ,http://b"), vec!["http://a", "http://b"]);
  }
}
