//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to core logic. We reply with a single JSON message per request.

use std::sync::Arc;

use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tracing::{debug, error, info, instrument};

use crate::errors::ApiError;
use crate::logic::*;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::routes::UserId;
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>, UserId(user): UserId) -> impl IntoResponse {
  info!(target: "edusynth_backend", %user, "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state, user))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>, user: String) {
  info!(target: "edusynth_backend", "WebSocket connected");
  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        let reply_msg = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "edusynth_backend", "WS received: {:?}", &incoming);
            handle_client_ws(incoming, &state, &user).await
          }
          Err(e) => ServerWsMessage::Error { detail: format!("Invalid JSON: {}", e), code: "BAD_REQUEST".into() },
        };

        let out = serde_json::to_string(&reply_msg).unwrap_or_else(|e| {
          serde_json::json!({ "type": "error", "detail": format!("Serialization error: {}", e), "code": "INTERNAL_ERROR" })
            .to_string()
        });

        if let Err(e) = socket.send(Message::Text(out)).await {
          error!(target: "edusynth_backend", error = %e, "WS send error");
          break;
        }
      }
      Message::Ping(payload) => {
        let _ = socket.send(Message::Pong(payload)).await;
      }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "edusynth_backend", "WebSocket disconnected");
}

fn reply<T>(res: Result<T, ApiError>, wrap: impl FnOnce(T) -> ServerWsMessage) -> ServerWsMessage {
  match res {
    Ok(v) => wrap(v),
    Err(e) => ServerWsMessage::Error { detail: e.to_string(), code: e.code().into() },
  }
}

pub async fn handle_client_ws(msg: ClientWsMessage, state: &AppState, user: &str) -> ServerWsMessage {
  match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,
    ClientWsMessage::TutorSession(req) => reply(tutor_session(state, user, req).await, ServerWsMessage::TutorSession),
    ClientWsMessage::TutorAudio(req) => reply(tutor_audio(state, req).await, ServerWsMessage::TutorAudio),
    ClientWsMessage::ExamGenerate(req) => reply(exam_generate(state, req).await, ServerWsMessage::ExamPaper),
    ClientWsMessage::ExamBlueprint(req) => reply(exam_blueprint(state, req).await, ServerWsMessage::ExamBlueprint),
    ClientWsMessage::JourneyStart(req) => reply(journey_start(state, user, req).await, ServerWsMessage::Journey),
    ClientWsMessage::JourneyNode { course_id, node_id } => {
      reply(journey_node(state, user, &course_id, &node_id).await, ServerWsMessage::JourneyNode)
    }
    ClientWsMessage::SubmitQuiz(req) => reply(submit_quiz(state, user, req).await, ServerWsMessage::QuizResult),
    ClientWsMessage::Doubt(req) => reply(ask_doubt(state, user, req).await, ServerWsMessage::Doubt),
    ClientWsMessage::VideoGenerate(req) => reply(start_video(state, user, req).await, ServerWsMessage::VideoJob),
    ClientWsMessage::VideoStatus { job_id } => reply(video_status(state, &job_id).await, ServerWsMessage::VideoStatus),
  }
}
