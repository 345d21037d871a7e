//! HTTP endpoint handlers. These are thin wrappers that forward to `logic`.
//! Each handler is instrumented; failures become JSON `ApiError` responses.

use std::sync::Arc;
use axum::{extract::{Path, State}, Json};
use tracing::{info, instrument};

use crate::error::ApiError;
use crate::logic::{self, StatusChange};
use crate::protocol::*;
use crate::session::SessionView;
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, ApiError>;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> Json<HealthOut> {
  Json(HealthOut { ok: true, source: state.engine.source_name().to_string() })
}

#[instrument(level = "info", skip(state, body), fields(topic = %body.topic))]
pub async fn http_start_session(
  State(state): State<Arc<AppState>>,
  Json(body): Json<StartIn>,
) -> ApiResult<SessionView> {
  let view = logic::start_session(&state, &body.topic).await?;
  info!(target: "recque_backend", id = %view.id, "HTTP session started");
  Ok(Json(view))
}

#[instrument(level = "info", skip(state))]
pub async fn http_list_sessions(State(state): State<Arc<AppState>>) -> ApiResult<SessionsOut> {
  let sessions = logic::list_sessions(&state).await?;
  Ok(Json(SessionsOut { sessions }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<SessionView> {
  Ok(Json(logic::get_session(&state, &id).await?))
}

#[instrument(level = "info", skip(state, body), fields(answer_len = body.answer.len()))]
pub async fn http_post_answer(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<AnswerIn>,
) -> ApiResult<AnswerOut> {
  let out = logic::submit_answer(&state, &id, &body.answer).await?;
  info!(target: "recque_backend", %id, correct = out.correct, "HTTP answer evaluated");
  Ok(Json(out))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_new_question(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<SessionView> {
  Ok(Json(logic::new_question(&state, &id).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_next_skill(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<NextSkillOut> {
  Ok(Json(logic::next_skill(&state, &id).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_pause(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<SessionView> {
  Ok(Json(logic::change_status(&state, &id, StatusChange::Pause).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_resume(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<SessionView> {
  Ok(Json(logic::change_status(&state, &id, StatusChange::Resume).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_abandon(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<SessionView> {
  Ok(Json(logic::change_status(&state, &id, StatusChange::Abandon).await?))
}
