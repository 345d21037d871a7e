//! Error taxonomy shared by the engine, the sources, the session store and the API.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use thiserror::Error;

/// The generation backend could not produce a valid structured result.
///
/// Carries enough context for the caller to retry the same request; the engine
/// itself never retries or substitutes a fallback.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GenerationError {
  #[error("transport error: {0}")]
  Transport(String),

  #[error("backend HTTP {status}: {message}")]
  Http { status: u16, message: String },

  #[error("malformed response: {0}")]
  Malformed(String),

  #[error("invalid question: {0}")]
  InvalidQuestion(String),

  #[error("generation timed out after {0}s")]
  Timeout(u64),

  #[error("unsupported request: {0}")]
  Unsupported(String),
}

pub type GenerationResult<T> = Result<T, GenerationError>;

/// Failures of the session persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("serialization error: {0}")]
  Serde(#[from] serde_json::Error),

  #[error("session not found: {0}")]
  NotFound(String),
}

/// Failures of one learning-session operation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
  #[error(transparent)]
  Generation(#[from] GenerationError),

  #[error("answer {0:?} is not an option of the current question")]
  UnknownAnswer(String),

  #[error("no question is on the stack")]
  NoActiveQuestion,

  #[error("session is {0}")]
  NotActive(&'static str),
}

/// Errors surfaced through the HTTP/WebSocket layer.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error(transparent)]
  Generation(#[from] GenerationError),

  #[error(transparent)]
  Session(#[from] SessionError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("unknown session: {0}")]
  UnknownSession(String),

  #[error("bad request: {0}")]
  BadRequest(String),
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::Generation(_) | ApiError::Session(SessionError::Generation(_)) => StatusCode::BAD_GATEWAY,
      ApiError::Session(SessionError::UnknownAnswer(_)) => StatusCode::BAD_REQUEST,
      ApiError::Session(_) => StatusCode::CONFLICT,
      ApiError::Store(StoreError::NotFound(_)) | ApiError::UnknownSession(_) => StatusCode::NOT_FOUND,
      ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    let body = crate::protocol::ErrorOut { message: self.to_string() };
    (status, Json(body)).into_response()
  }
}
