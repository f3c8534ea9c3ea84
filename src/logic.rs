//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - tutoring sessions (a video request also queues a lecture job)
//!   - exam generation, blueprint and structure-aware
//!   - learning journeys: start, lazy lesson content, quiz submission
//!   - doubt solving and video lecture jobs

use tracing::{debug, info, instrument, warn};

use crate::agents::{doubt, examiner, journey, join_docs, paper, tutor};
use crate::classify::Intent;
use crate::domain::{JourneyNode, JourneyState};
use crate::errors::ApiError;
use crate::jobs::{JobRecord, JobStatus};
use crate::progression::QuizOutcome;
use crate::protocol::*;
use crate::state::AppState;
use crate::util::session_collection;

/// Documents of session context handed to the lecture script.
const VIDEO_CONTEXT_DOCS: usize = 5;

fn require(field: &str, value: &str) -> Result<(), ApiError> {
  if value.trim().is_empty() {
    return Err(ApiError::BadRequest(format!("{} must not be empty", field)));
  }
  Ok(())
}

#[instrument(level = "info", skip(state, req), fields(%user_id, topic_len = req.topic.len(), session = %req.session_name))]
pub async fn tutor_session(state: &AppState, user_id: &str, req: TutorSessionIn) -> Result<TutorSessionOut, ApiError> {
  require("topic", &req.topic)?;
  let agents = state.agents()?;
  let input = tutor::TutorInput {
    query: req.topic.clone(),
    explicit_audio: req.generate_audio,
    language_code: req.language_code,
    collection: session_collection(user_id, &req.session_name),
  };
  let outcome = tutor::run(&agents.tutor, input).await;

  let video_job_id = if outcome.intent == Intent::Video {
    let job = start_video(
      state,
      user_id,
      VideoGenerateIn { topic: req.topic, session_name: req.session_name, use_rag: true },
    )
    .await?;
    Some(job.job_id)
  } else {
    None
  };
  info!(
    target: "tutor",
    intent = outcome.intent.as_str(),
    degraded = ?outcome.degraded,
    video_job = ?video_job_id,
    "Tutor session answered"
  );
  Ok(TutorSessionOut { outcome, video_job_id })
}

#[instrument(level = "info", skip(state, req), fields(text_len = req.text.len(), language = %req.language_code))]
pub async fn tutor_audio(state: &AppState, req: TutorAudioIn) -> Result<TutorAudioOut, ApiError> {
  require("text", &req.text)?;
  let audio_base64 = state
    .speech
    .synthesize(&req.text, &req.language_code)
    .await
    .ok_or_else(|| ApiError::Internal("Failed to generate audio".into()))?;
  Ok(TutorAudioOut { audio_base64 })
}

#[instrument(level = "info", skip(state, req), fields(syllabus_len = req.syllabus_text.len()))]
pub async fn exam_generate(state: &AppState, req: ExamGenerateIn) -> Result<paper::PaperOutcome, ApiError> {
  require("syllabus_text", &req.syllabus_text)?;
  let agents = state.agents()?;
  let input = paper::PaperInput {
    syllabus: req.syllabus_text,
    reference_text: req.reference_text,
    subject_filter: req.subject_filter,
  };
  let out = paper::run(&agents.paper, input).await;
  info!(
    target: "exam",
    questions = out.exam.metadata.total_questions,
    marks = out.exam.metadata.total_marks,
    degraded = ?out.degraded,
    "Exam paper generated"
  );
  Ok(out)
}

#[instrument(level = "info", skip(state, req), fields(syllabus_len = req.syllabus_text.len()))]
pub async fn exam_blueprint(state: &AppState, req: BlueprintIn) -> Result<examiner::ExaminerOutcome, ApiError> {
  require("syllabus_text", &req.syllabus_text)?;
  let agents = state.agents()?;
  let out = examiner::run(&agents.examiner, &req.syllabus_text).await;
  info!(
    target: "exam",
    modules = out.blueprint.len(),
    questions = out.exam.metadata.total_questions,
    degraded = ?out.degraded,
    "Blueprint exam generated"
  );
  Ok(out)
}

#[instrument(level = "info", skip(state, req), fields(%user_id, syllabus_len = req.syllabus_text.len()))]
pub async fn journey_start(state: &AppState, user_id: &str, req: JourneyStartIn) -> Result<JourneyState, ApiError> {
  require("syllabus_text", &req.syllabus_text)?;
  let agents = state.agents()?;
  let nodes = journey::generate_curriculum(&agents.curriculum, &req.syllabus_text).await;
  let course_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
  let course = JourneyState::new(course_id, &req.syllabus_text, nodes);
  state.courses.insert(user_id, course.clone()).await;
  info!(target: "journey", %user_id, course = %course.course_id, nodes = course.nodes.len(), "Journey started");
  Ok(course)
}

/// Node with its lesson. Content is generated on first access, under the course lock.
#[instrument(level = "info", skip(state), fields(%user_id, %course_id, %node_id))]
pub async fn journey_node(state: &AppState, user_id: &str, course_id: &str, node_id: &str) -> Result<JourneyNode, ApiError> {
  let handle = state.courses.get(user_id, course_id).await?;
  let mut course = handle.lock().await;
  let idx = course.accessible_index(node_id)?;
  if course.needs_content(idx) {
    let agents = state.agents()?;
    let title = course.nodes[idx].title.clone();
    let lesson = journey::generate_lesson(&agents.lesson, &title, &session_collection(user_id, course_id)).await;
    let node = &mut course.nodes[idx];
    node.content_summary = lesson.content_summary;
    node.quiz_questions = lesson.quiz_questions;
  } else {
    debug!(target: "journey", %node_id, "Serving cached lesson");
  }
  Ok(course.nodes[idx].clone())
}

#[instrument(level = "info", skip(state, req), fields(%user_id, course = %req.course_id, node = %req.node_id, answers = req.answers.len()))]
pub async fn submit_quiz(state: &AppState, user_id: &str, req: SubmitQuizIn) -> Result<QuizOutcome, ApiError> {
  let handle = state.courses.get(user_id, &req.course_id).await?;
  let mut course = handle.lock().await;
  Ok(course.submit_quiz(&req.node_id, &req.answers)?)
}

#[instrument(level = "info", skip(state, req), fields(%user_id, doubt_len = req.doubt.len(), session = %req.session_name))]
pub async fn ask_doubt(state: &AppState, user_id: &str, req: DoubtIn) -> Result<DoubtOut, ApiError> {
  require("doubt", &req.doubt)?;
  let agents = state.agents()?;
  let collection = session_collection(user_id, &req.session_name);
  let out = doubt::run(&agents.doubt, &req.doubt, &collection, req.rag_context).await;
  Ok(DoubtOut { answer: out.answer, web_search_used: out.web_search_used })
}

/// Queue a lecture job and return at once; the pipeline runs on its own task.
#[instrument(level = "info", skip(state, req), fields(%user_id, topic = %req.topic, use_rag = req.use_rag))]
pub async fn start_video(state: &AppState, user_id: &str, req: VideoGenerateIn) -> Result<VideoJobOut, ApiError> {
  require("topic", &req.topic)?;
  let lectures = state.lectures()?;

  let context = if req.use_rag {
    let collection = session_collection(user_id, &req.session_name);
    match state.retriever.retrieve(&collection, &req.topic, VIDEO_CONTEXT_DOCS).await {
      Ok(docs) => join_docs(&docs, VIDEO_CONTEXT_DOCS, "\n\n"),
      Err(e) => {
        warn!(target: "video", %collection, error = %e, "Context retrieval failed; generating without it");
        String::new()
      }
    }
  } else {
    String::new()
  };

  let job = state.jobs.create().await;
  let job_id = job.job_id().to_string();
  let topic = req.topic;
  let task = tokio::spawn(async move {
    lectures.run(job, topic, context).await;
  });
  state.jobs.watch(job_id.clone(), task);
  info!(target: "video", %job_id, "Video job queued");
  Ok(VideoJobOut {
    message: format!("Video generation started. Check status at /api/v1/video/status/{}", job_id),
    job_id,
    status: JobStatus::Queued,
  })
}

pub async fn video_status(state: &AppState, job_id: &str) -> Result<JobRecord, ApiError> {
  state
    .jobs
    .get(job_id)
    .await
    .ok_or_else(|| ApiError::NotFound("Job not found".into()))
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::llm::LanguageModel;
  use crate::progression::QuizResult;
  use crate::services::mock::{FixedRetriever, ScriptedModel};
  use crate::state::testing::state_with;

  const CURRICULUM: &str = r#"[{"id": "node_1", "title": "Sets", "description": "What a set is"},
    {"id": "node_2", "title": "Maps", "description": "Key to value"}]"#;
  const LESSON: &str = r###"{"content_summary": "## Sets\n\nUnordered, unique.", "quiz_questions": [
    {"question": "Duplicates?", "options": ["No", "Yes", "Sometimes", "Never mind"], "correct_answer": 0},
    {"question": "Ordered?", "options": ["Yes", "No", "Always", "Depends"], "correct_answer": 1},
    {"question": "Symbol?", "options": ["()", "[]", "{}", "<>"], "correct_answer": 2}]}"###;

  #[tokio::test]
  async fn journey_content_is_generated_once_and_gated() {
    let llm = Arc::new(ScriptedModel::new().reply(CURRICULUM).reply(LESSON));
    let model: Arc<dyn LanguageModel> = llm.clone();
    let state = state_with(Some(model), Arc::new(FixedRetriever::default()));

    let course = journey_start(&state, "u1", JourneyStartIn { syllabus_text: "Data structures".into() }).await.unwrap();
    assert_eq!(course.course_id.len(), 8);
    assert_eq!(course.nodes.len(), 2);
    let cid = course.course_id.clone();

    let locked = journey_node(&state, "u1", &cid, "node_2").await.unwrap_err();
    assert!(matches!(locked, ApiError::Locked(_)));

    let node = journey_node(&state, "u1", &cid, "node_1").await.unwrap();
    assert!(node.content_summary.starts_with("## Sets"));
    assert_eq!(node.quiz_questions.len(), 3);
    journey_node(&state, "u1", &cid, "node_1").await.unwrap();
    assert_eq!(llm.calls(), 2);

    let out = submit_quiz(
      &state,
      "u1",
      SubmitQuizIn { course_id: cid.clone(), node_id: "node_1".into(), answers: vec![0, 1, 2] },
    )
    .await
    .unwrap();
    assert_eq!(out.result, QuizResult::Pass);
    assert_eq!(out.next_node_id.as_deref(), Some("node_2"));

    let other = journey_node(&state, "u2", &cid, "node_1").await.unwrap_err();
    assert_eq!(other, ApiError::NotFound("Journey not found".into()));
  }

  #[tokio::test]
  async fn concurrent_node_reads_generate_one_lesson() {
    let llm = Arc::new(ScriptedModel::new().reply(CURRICULUM).reply(LESSON));
    let model: Arc<dyn LanguageModel> = llm.clone();
    let state = state_with(Some(model), Arc::new(FixedRetriever::default()));
    let cid = journey_start(&state, "u1", JourneyStartIn { syllabus_text: "Sets".into() }).await.unwrap().course_id;

    let (a, b) = tokio::join!(journey_node(&state, "u1", &cid, "node_1"), journey_node(&state, "u1", &cid, "node_1"));
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(llm.calls(), 2);
  }

  #[tokio::test]
  async fn concurrent_passes_advance_once() {
    let llm: Arc<dyn LanguageModel> = Arc::new(ScriptedModel::new().reply(CURRICULUM));
    let state = state_with(Some(llm), Arc::new(FixedRetriever::default()));
    let cid = journey_start(&state, "u1", JourneyStartIn { syllabus_text: "Sets".into() }).await.unwrap().course_id;

    let submit = || SubmitQuizIn { course_id: cid.clone(), node_id: "node_1".into(), answers: vec![] };
    let (a, b) = tokio::join!(submit_quiz(&state, "u1", submit()), submit_quiz(&state, "u1", submit()));
    let nexts: Vec<Option<String>> = vec![a.unwrap().next_node_id, b.unwrap().next_node_id];
    assert_eq!(nexts.iter().filter(|n| n.is_some()).count(), 1);

    let handle = state.courses.get("u1", &cid).await.unwrap();
    let course = handle.lock().await;
    assert_eq!(course.current_node_index, 1);
  }

  #[tokio::test]
  async fn repeated_curriculum_ids_stay_completable() {
    let llm: Arc<dyn LanguageModel> = Arc::new(ScriptedModel::new().reply(
      r#"[{"id": "node_1", "title": "A"}, {"id": "node_1", "title": "B"}, {"id": "node_3", "title": "C"}]"#,
    ));
    let state = state_with(Some(llm), Arc::new(FixedRetriever::default()));
    let course = journey_start(&state, "u1", JourneyStartIn { syllabus_text: "ABC".into() }).await.unwrap();
    let ids: Vec<String> = course.nodes.iter().map(|n| n.id.clone()).collect();
    assert_eq!(ids, vec!["node_1", "node_2", "node_3"]);

    let mut last = None;
    for id in &ids {
      let req = SubmitQuizIn { course_id: course.course_id.clone(), node_id: id.clone(), answers: vec![] };
      last = Some(submit_quiz(&state, "u1", req).await.unwrap());
    }
    assert!(last.unwrap().course_completed);
  }

  #[tokio::test]
  async fn model_backed_operations_need_a_model() {
    let state = state_with(None, Arc::new(FixedRetriever::default()));
    let err = journey_start(&state, "u", JourneyStartIn { syllabus_text: "x".into() }).await.unwrap_err();
    assert!(matches!(err, ApiError::ModelUnavailable(_)));
    let err = exam_blueprint(&state, BlueprintIn { syllabus_text: "   ".into() }).await.unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
  }

  #[tokio::test]
  async fn audio_failure_and_unknown_jobs() {
    let state = state_with(None, Arc::new(FixedRetriever::default()));
    let err = tutor_audio(&state, TutorAudioIn { text: "namaste".into(), language_code: "hi-IN".into() }).await.unwrap_err();
    assert_eq!(err, ApiError::Internal("Failed to generate audio".into()));
    assert_eq!(video_status(&state, "nope").await.unwrap_err(), ApiError::NotFound("Job not found".into()));
  }

  #[tokio::test]
  async fn video_intent_queues_a_lecture_job() {
    let llm: Arc<dyn LanguageModel> =
      Arc::new(ScriptedModel::new().reply("Gravity basics, Orbits").reply("Gravity pulls masses together."));
    let state = state_with(Some(llm), Arc::new(FixedRetriever::default()));
    let req = TutorSessionIn {
      topic: "make a video about gravity".into(),
      generate_audio: false,
      language_code: "en-IN".into(),
      session_name: "physics".into(),
    };
    let out = tutor_session(&state, "u1", req).await.unwrap();
    assert_eq!(out.outcome.intent, Intent::Video);
    assert_eq!(out.outcome.response, "Gravity pulls masses together.");
    let job_id = out.video_job_id.unwrap();
    assert!(state.jobs.get(&job_id).await.is_some());
  }
}
