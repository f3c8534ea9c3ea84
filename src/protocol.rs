//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Response bodies are shared: HTTP returns them as JSON, WS wraps them in a tagged message.

use serde::{Deserialize, Serialize};

use crate::agents::examiner::ExaminerOutcome;
use crate::agents::paper::PaperOutcome;
use crate::agents::tutor::TutorOutcome;
use crate::domain::{JourneyNode, JourneyState};
use crate::jobs::{JobRecord, JobStatus};
use crate::progression::QuizOutcome;

fn default_session() -> String {
  "default".into()
}

fn default_tutor_language() -> String {
  "en-IN".into()
}

fn default_audio_language() -> String {
  "hi-IN".into()
}

fn default_true() -> bool {
  true
}

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
  Ping,
  TutorSession(TutorSessionIn),
  TutorAudio(TutorAudioIn),
  ExamGenerate(ExamGenerateIn),
  ExamBlueprint(BlueprintIn),
  JourneyStart(JourneyStartIn),
  JourneyNode { course_id: String, node_id: String },
  SubmitQuiz(SubmitQuizIn),
  Doubt(DoubtIn),
  VideoGenerate(VideoGenerateIn),
  VideoStatus { job_id: String },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
  Pong,
  TutorSession(TutorSessionOut),
  TutorAudio(TutorAudioOut),
  ExamPaper(PaperOutcome),
  ExamBlueprint(ExaminerOutcome),
  Journey(JourneyState),
  JourneyNode(JourneyNode),
  QuizResult(QuizOutcome),
  Doubt(DoubtOut),
  VideoJob(VideoJobOut),
  VideoStatus(JobRecord),
  Error { detail: String, code: String },
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct TutorSessionIn {
  pub topic: String,
  #[serde(default)]
  pub generate_audio: bool,
  #[serde(default = "default_tutor_language")]
  pub language_code: String,
  #[serde(default = "default_session")]
  pub session_name: String,
}

#[derive(Debug, Serialize)]
pub struct TutorSessionOut {
  #[serde(flatten)]
  pub outcome: TutorOutcome,
  /// Set when the query asked for a video lecture; poll `/api/v1/video/status/{id}`.
  pub video_job_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TutorAudioIn {
  pub text: String,
  #[serde(default = "default_audio_language")]
  pub language_code: String,
}

#[derive(Debug, Serialize)]
pub struct TutorAudioOut {
  pub audio_base64: String,
}

#[derive(Debug, Deserialize)]
pub struct ExamGenerateIn {
  pub syllabus_text: String,
  #[serde(default)]
  pub reference_text: Option<String>,
  #[serde(default)]
  pub subject_filter: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BlueprintIn {
  pub syllabus_text: String,
}

#[derive(Debug, Deserialize)]
pub struct JourneyStartIn {
  pub syllabus_text: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitQuizIn {
  pub course_id: String,
  pub node_id: String,
  /// Chosen option index per question.
  #[serde(default)]
  pub answers: Vec<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DoubtIn {
  pub doubt: String,
  #[serde(default = "default_session")]
  pub session_name: String,
  #[serde(default)]
  pub rag_context: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DoubtOut {
  pub answer: String,
  pub web_search_used: bool,
}

#[derive(Debug, Deserialize)]
pub struct VideoGenerateIn {
  pub topic: String,
  #[serde(default = "default_session")]
  pub session_name: String,
  #[serde(default = "default_true")]
  pub use_rag: bool,
}

#[derive(Debug, Serialize)]
pub struct VideoJobOut {
  pub job_id: String,
  pub status: JobStatus,
  pub message: String,
}

#[derive(Serialize)]
pub struct HealthOut {
  pub ok: bool,
  pub llm_configured: bool,
}
