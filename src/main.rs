//! EduSynth · education backend
//!
//! - Axum HTTP + WebSocket API over five orchestrators (tutor, exam, journey,
//!   doubt, video lecture) built on a small stage-workflow engine
//! - Groq-compatible chat model with key rotation; without a key, model-backed
//!   routes answer 503
//! - In-memory retriever seeded from the built-in exam bank unless RETRIEVER_URL is set
//!
//! Important env variables:
//!   PORT                : u16 (default 3000)
//!   GROQ_API_KEYS       : key pool, comma/semicolon/newline separated (preferred)
//!   GROQ_API_KEY        : single key
//!   LLM_BASE_URL        : default "https://api.groq.com/openai/v1"
//!   LLM_FAST_MODEL / LLM_SMART_MODEL / LLM_BEST_MODEL
//!   LLM_MAX_ATTEMPTS    : default 3
//!   SARVAM_API_KEY      : text-to-speech
//!   PEXELS_API_KEY      : stock footage for video lectures
//!   RETRIEVER_URL       : HTTP vector-store service
//!   FFMPEG_BIN / FFPROBE_BIN
//!   VIDEO_OUTPUT_DIR    : default "generated_videos"
//!   CORS_ORIGINS        : comma separated; any origin when unset
//!   AGENT_CONFIG_PATH   : path to TOML config (prompts + seed document bank)
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

mod agents;
mod classify;
mod config;
mod domain;
mod errors;
mod extract;
mod jobs;
mod llm;
mod logic;
mod progression;
mod protocol;
mod routes;
mod seeds;
mod services;
mod state;
mod telemetry;
mod util;
mod video;
mod workflow;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let state = Arc::new(AppState::from_env().await?);
  let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.port));
  let app = build_router(state);

  let listener = TcpListener::bind(addr).await?;
  info!(target: "edusynth_backend", %addr, "HTTP server listening");
  axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "edusynth_backend", error = %e, "Failed to listen for ctrl-c");
  }
  info!(target: "edusynth_backend", "Shutting down");
}
