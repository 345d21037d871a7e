//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to `logic`. We reply with a single JSON message per request.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tracing::{info, error, instrument, debug};

use crate::error::ApiError;
use crate::logic::{self, StatusChange};
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "recque_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "recque_backend", "WebSocket connected");
  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        let reply_msg = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "recque_backend", "WS received: {:?}", &incoming);
            handle_client_ws(incoming, &state).await
          }
          Err(e) => ServerWsMessage::Error { status: 400, message: format!("Invalid JSON: {}", e) },
        };

        let out = serde_json::to_string(&reply_msg).unwrap_or_else(|e| {
          serde_json::json!({ "type": "error", "status": 500, "message": format!("Serialization error: {}", e) }).to_string()
        });

        if let Err(e) = socket.send(Message::Text(out)).await {
          error!(target: "recque_backend", error = %e, "WS send error");
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "recque_backend", "WebSocket disconnected");
}

fn to_error(e: ApiError) -> ServerWsMessage {
  ServerWsMessage::Error { status: e.status().as_u16(), message: e.to_string() }
}

#[instrument(level = "info", skip(state))]
pub async fn handle_client_ws(msg: ClientWsMessage, state: &Arc<AppState>) -> ServerWsMessage {
  let result = match msg {
    ClientWsMessage::Ping => Ok(ServerWsMessage::Pong),

    ClientWsMessage::StartSession { topic } => logic::start_session(state, &topic)
      .await
      .map(|session| ServerWsMessage::Session { session }),

    ClientWsMessage::ListSessions => logic::list_sessions(state)
      .await
      .map(|sessions| ServerWsMessage::Sessions { sessions }),

    ClientWsMessage::GetSession { session_id } => logic::get_session(state, &session_id)
      .await
      .map(|session| ServerWsMessage::Session { session }),

    ClientWsMessage::Answer { session_id, answer } => logic::submit_answer(state, &session_id, &answer)
      .await
      .map(|out| {
        info!(target: "recque_backend", id = %session_id, correct = out.correct, "WS answer evaluated");
        ServerWsMessage::AnswerResult { correct: out.correct, outcome: out.outcome, session: out.session }
      }),

    ClientWsMessage::NewQuestion { session_id } => logic::new_question(state, &session_id)
      .await
      .map(|session| ServerWsMessage::Session { session }),

    ClientWsMessage::NextSkill { session_id } => logic::next_skill(state, &session_id)
      .await
      .map(|out| ServerWsMessage::SkillAdvanced { advance: out.advance, session: out.session }),

    ClientWsMessage::Pause { session_id } => status(state, &session_id, StatusChange::Pause).await,
    ClientWsMessage::Resume { session_id } => status(state, &session_id, StatusChange::Resume).await,
    ClientWsMessage::Abandon { session_id } => status(state, &session_id, StatusChange::Abandon).await,
  };
  result.unwrap_or_else(to_error)
}

async fn status(state: &Arc<AppState>, id: &str, change: StatusChange) -> Result<ServerWsMessage, ApiError> {
  logic::change_status(state, id, change).await.map(|session| ServerWsMessage::Session { session })
}
