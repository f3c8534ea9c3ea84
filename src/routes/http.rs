//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.

use std::sync::Arc;

use axum::{
  extract::{Path, State},
  response::IntoResponse,
  Json,
};
use tracing::instrument;

use crate::agents::examiner::ExaminerOutcome;
use crate::agents::paper::PaperOutcome;
use crate::domain::{JourneyNode, JourneyState};
use crate::errors::ApiError;
use crate::jobs::JobRecord;
use crate::logic::*;
use crate::progression::QuizOutcome;
use crate::protocol::*;
use crate::routes::UserId;
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, ApiError>;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, llm_configured: state.agents().is_ok() })
}

pub async fn http_tutor_session(
  State(state): State<Arc<AppState>>,
  UserId(user): UserId,
  Json(body): Json<TutorSessionIn>,
) -> ApiResult<TutorSessionOut> {
  tutor_session(&state, &user, body).await.map(Json)
}

pub async fn http_tutor_audio(State(state): State<Arc<AppState>>, Json(body): Json<TutorAudioIn>) -> ApiResult<TutorAudioOut> {
  tutor_audio(&state, body).await.map(Json)
}

pub async fn http_exam_generate(State(state): State<Arc<AppState>>, Json(body): Json<ExamGenerateIn>) -> ApiResult<PaperOutcome> {
  exam_generate(&state, body).await.map(Json)
}

pub async fn http_exam_blueprint(State(state): State<Arc<AppState>>, Json(body): Json<BlueprintIn>) -> ApiResult<ExaminerOutcome> {
  exam_blueprint(&state, body).await.map(Json)
}

pub async fn http_journey_start(
  State(state): State<Arc<AppState>>,
  UserId(user): UserId,
  Json(body): Json<JourneyStartIn>,
) -> ApiResult<JourneyState> {
  journey_start(&state, &user, body).await.map(Json)
}

pub async fn http_journey_node(
  State(state): State<Arc<AppState>>,
  UserId(user): UserId,
  Path((course_id, node_id)): Path<(String, String)>,
) -> ApiResult<JourneyNode> {
  journey_node(&state, &user, &course_id, &node_id).await.map(Json)
}

pub async fn http_submit_quiz(
  State(state): State<Arc<AppState>>,
  UserId(user): UserId,
  Json(body): Json<SubmitQuizIn>,
) -> ApiResult<QuizOutcome> {
  submit_quiz(&state, &user, body).await.map(Json)
}

pub async fn http_ask_doubt(
  State(state): State<Arc<AppState>>,
  UserId(user): UserId,
  Json(body): Json<DoubtIn>,
) -> ApiResult<DoubtOut> {
  ask_doubt(&state, &user, body).await.map(Json)
}

pub async fn http_video_generate(
  State(state): State<Arc<AppState>>,
  UserId(user): UserId,
  Json(body): Json<VideoGenerateIn>,
) -> ApiResult<VideoJobOut> {
  start_video(&state, &user, body).await.map(Json)
}

#[instrument(level = "debug", skip(state))]
pub async fn http_video_status(State(state): State<Arc<AppState>>, Path(job_id): Path<String>) -> ApiResult<JobRecord> {
  video_status(&state, &job_id).await.map(Json)
}
