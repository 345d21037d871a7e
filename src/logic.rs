//! Session operations shared by both HTTP and WebSocket handlers.
//!
//! Every operation that changes a session saves its snapshot through the store
//! before replying, and kicks off a background prefetch when a new question
//! reached the top of the stack. A failed save never turns an applied change
//! into an error reply, since a client retry would apply it twice.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::error::ApiError;
use crate::protocol::{AnswerOut, NextSkillOut};
use crate::session::{AnswerOutcome, LearningSession, SessionView, SkillAdvance};
use crate::state::AppState;
use crate::store::{resumable, SessionSummary};

#[instrument(level = "info", skip(state))]
pub async fn start_session(state: &Arc<AppState>, topic: &str) -> Result<SessionView, ApiError> {
  let topic = topic.trim();
  if topic.is_empty() {
    return Err(ApiError::BadRequest("topic must not be empty".into()));
  }
  let session = LearningSession::start(&state.engine, topic).await?;
  let view = session.view();
  let handle = state.insert(session).await?;
  state.spawn_prefetch(handle);
  info!(target: "recque_backend", id = %view.id, %topic, "Session created");
  Ok(view)
}

pub async fn list_sessions(state: &AppState) -> Result<Vec<SessionSummary>, ApiError> {
  Ok(resumable(state.store.as_ref()).await?)
}

pub async fn get_session(state: &AppState, id: &str) -> Result<SessionView, ApiError> {
  let handle = state.session(id).await?;
  let view = handle.lock().await.view();
  Ok(view)
}

#[instrument(level = "info", skip(state, answer), fields(answer_len = answer.len()))]
pub async fn submit_answer(state: &Arc<AppState>, id: &str, answer: &str) -> Result<AnswerOut, ApiError> {
  let handle = state.session(id).await?;
  let mut session = handle.lock().await;
  let outcome = session.answer(&state.engine, answer).await?;
  state.persist(&session).await;
  let correct = !matches!(outcome, AnswerOutcome::Remediation { .. });
  // No-op unless the new top has no prefetch yet.
  state.spawn_prefetch(handle.clone());
  info!(target: "recque_backend", %id, correct, depth = session.stack().depth(), "Answer processed");
  Ok(AnswerOut { correct, outcome, session: session.view() })
}

#[instrument(level = "info", skip(state))]
pub async fn new_question(state: &Arc<AppState>, id: &str) -> Result<SessionView, ApiError> {
  let handle = state.session(id).await?;
  let mut session = handle.lock().await;
  session.new_question(&state.engine).await?;
  state.persist(&session).await;
  state.spawn_prefetch(handle.clone());
  Ok(session.view())
}

#[instrument(level = "info", skip(state))]
pub async fn next_skill(state: &Arc<AppState>, id: &str) -> Result<NextSkillOut, ApiError> {
  let handle = state.session(id).await?;
  let mut session = handle.lock().await;
  let advance = session.next_skill(&state.engine).await?;
  let saved = state.persist(&session).await;
  let view = session.view();
  drop(session);
  match &advance {
    // Unsaved sessions stay live so the store is not left behind.
    SkillAdvance::TopicComplete if saved => {
      state.evict(id).await;
      info!(target: "recque_backend", %id, "Topic complete; session evicted from memory");
    }
    _ => state.spawn_prefetch(handle),
  }
  Ok(NextSkillOut { advance, session: view })
}

/// Which status change a client asked for.
#[derive(Clone, Copy, Debug)]
pub enum StatusChange {
  Pause,
  Resume,
  Abandon,
}

#[instrument(level = "info", skip(state))]
pub async fn change_status(state: &Arc<AppState>, id: &str, change: StatusChange) -> Result<SessionView, ApiError> {
  let handle = state.session(id).await?;
  let mut session = handle.lock().await;
  match change {
    StatusChange::Pause => session.pause()?,
    StatusChange::Resume => session.resume()?,
    StatusChange::Abandon => session.abandon()?,
  }
  let saved = state.persist(&session).await;
  let view = session.view();
  drop(session);
  match change {
    StatusChange::Resume => state.spawn_prefetch(handle),
    StatusChange::Abandon if saved => state.evict(id).await,
    StatusChange::Abandon | StatusChange::Pause => {}
  }
  info!(target: "recque_backend", %id, status = view.status.as_str(), "Session status changed");
  Ok(view)
}
