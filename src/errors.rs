//! Errors surfaced to API callers. Orchestrators never fail (they degrade), so
//! these only come from lookups, gating and missing configuration.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::progression::ProgressionError;
use crate::workflow::WorkflowError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiError {
  #[error("{0}")]
  NotFound(String),
  #[error("{0}")]
  Locked(String),
  #[error("{0}")]
  BadRequest(String),
  /// No model credential configured.
  #[error("{0}")]
  ModelUnavailable(String),
  #[error("{0}")]
  Internal(String),
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::Locked(_) => StatusCode::FORBIDDEN,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
      ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  pub fn code(&self) -> &'static str {
    match self {
      ApiError::NotFound(_) => "NOT_FOUND",
      ApiError::Locked(_) => "LOCKED",
      ApiError::BadRequest(_) => "BAD_REQUEST",
      ApiError::ModelUnavailable(_) => "LLM_ERROR",
      ApiError::Internal(_) => "INTERNAL_ERROR",
    }
  }

  pub fn model_unavailable() -> Self {
    ApiError::ModelUnavailable("LLM not configured. Set GROQ_API_KEY or GROQ_API_KEYS.".into())
  }
}

impl From<ProgressionError> for ApiError {
  fn from(e: ProgressionError) -> Self {
    match e {
      ProgressionError::Locked => ApiError::Locked(e.to_string()),
      ProgressionError::CourseNotFound | ProgressionError::NodeNotFound => ApiError::NotFound(e.to_string()),
    }
  }
}

impl From<WorkflowError> for ApiError {
  fn from(e: WorkflowError) -> Self {
    ApiError::Internal(format!("workflow wiring: {}", e))
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!(target: "edusynth_backend", status = status.as_u16(), code = self.code(), detail = %self, "Request failed");
    } else {
      warn!(target: "edusynth_backend", status = status.as_u16(), code = self.code(), detail = %self, "Request rejected");
    }
    (status, Json(json!({ "detail": self.to_string(), "code": self.code() }))).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn progression_errors_map_to_http() {
    let locked: ApiError = ProgressionError::Locked.into();
    assert_eq!(locked.status(), StatusCode::FORBIDDEN);
    assert_eq!(locked.to_string(), "Node is locked. Complete previous levels first.");
    assert_eq!(ApiError::from(ProgressionError::CourseNotFound).status(), StatusCode::NOT_FOUND);
  }

  #[test]
  fn missing_model_is_service_unavailable() {
    let e = ApiError::model_unavailable();
    assert_eq!(e.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(e.code(), "LLM_ERROR");
    assert_eq!(e.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
  }
}
