//! Router assembly: HTTP endpoints, WebSocket upgrade, generated-video downloads, CORS,
//! and HTTP tracing.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
  async_trait,
  extract::FromRequestParts,
  http::{request::Parts, HeaderValue},
  routing::{get, post},
  Router,
};
use tower_http::{
  cors::{AllowOrigin, Any, CorsLayer},
  services::ServeDir,
  trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{warn, Level};

use crate::state::AppState;

pub mod http;
pub mod ws;

pub const USER_HEADER: &str = "x-user-id";
pub const DEFAULT_USER: &str = "default_user";

/// Caller identity. Authentication is upstream; a missing header means the shared default user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserId(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UserId {
  type Rejection = Infallible;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    let id = parts
      .headers
      .get(USER_HEADER)
      .and_then(|v| v.to_str().ok())
      .map(str::trim)
      .filter(|v| !v.is_empty())
      .unwrap_or(DEFAULT_USER);
    Ok(UserId(id.to_string()))
  }
}

fn cors(origins: &[String]) -> CorsLayer {
  let allow = if origins.is_empty() {
    AllowOrigin::any()
  } else {
    let parsed: Vec<HeaderValue> = origins
      .iter()
      .filter_map(|o| match HeaderValue::from_str(o) {
        Ok(v) => Some(v),
        Err(_) => {
          warn!(target: "edusynth_backend", origin = %o, "Ignoring invalid CORS origin");
          None
        }
      })
      .collect();
    AllowOrigin::list(parsed)
  };
  CorsLayer::new().allow_origin(allow).allow_methods(Any).allow_headers(Any)
}

/// Build the application router with:
/// - WebSocket at `/ws`
/// - JSON API under `/api/v1/...`
/// - finished lectures under `/downloads/generated_videos/{job_id}/lecture.mp4`
/// - CORS (any origin unless CORS_ORIGINS is set)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
  let downloads = ServeDir::new(&state.settings.video_output_dir);
  let cors = cors(&state.settings.cors_origins);

  Router::new()
    .route("/ws", get(ws::ws_upgrade))
    .route("/api/v1/health", get(http::http_health))
    .route("/api/v1/tutor/session", post(http::http_tutor_session))
    .route("/api/v1/tutor/audio", post(http::http_tutor_audio))
    .route("/api/v1/exam/generate", post(http::http_exam_generate))
    .route("/api/v1/exam/blueprint", post(http::http_exam_blueprint))
    .route("/api/v1/journey/start", post(http::http_journey_start))
    .route("/api/v1/journey/:course_id/node/:node_id", get(http::http_journey_node))
    .route("/api/v1/journey/submit_quiz", post(http::http_submit_quiz))
    .route("/api/v1/doubt/ask", post(http::http_ask_doubt))
    .route("/api/v1/video/generate", post(http::http_video_generate))
    .route("/api/v1/video/status/:job_id", get(http::http_video_status))
    .nest_service("/downloads/generated_videos", downloads)
    .with_state(state)
    .layer(cors)
    .layer(
      TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}
