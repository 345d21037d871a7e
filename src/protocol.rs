//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::session::{AnswerOutcome, SessionView, SkillAdvance};
use crate::store::SessionSummary;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    StartSession {
        topic: String,
    },
    ListSessions,
    GetSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Answer {
        #[serde(rename = "sessionId")]
        session_id: String,
        answer: String,
    },
    NewQuestion {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    NextSkill {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Pause {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Resume {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Abandon {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Session {
        session: SessionView,
    },
    Sessions {
        sessions: Vec<SessionSummary>,
    },
    AnswerResult {
        correct: bool,
        outcome: AnswerOutcome,
        session: SessionView,
    },
    SkillAdvanced {
        advance: SkillAdvance,
        session: SessionView,
    },
    Error {
        status: u16,
        message: String,
    },
}

// ---- HTTP DTOs ----

#[derive(Debug, Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub source: String,
}

#[derive(Debug, Deserialize)]
pub struct StartIn {
    pub topic: String,
}

#[derive(Debug, Deserialize)]
pub struct AnswerIn {
    pub answer: String,
}

#[derive(Debug, Serialize)]
pub struct AnswerOut {
    pub correct: bool,
    pub outcome: AnswerOutcome,
    pub session: SessionView,
}

#[derive(Debug, Serialize)]
pub struct NextSkillOut {
    pub advance: SkillAdvance,
    pub session: SessionView,
}

#[derive(Debug, Serialize)]
pub struct SessionsOut {
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Serialize)]
pub struct ErrorOut {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_use_tagged_camel_ids() {
        let msg: ClientWsMessage =
            serde_json::from_str(r#"{"type":"answer","sessionId":"abc","answer":"14"}"#).expect("parse");
        assert!(matches!(msg, ClientWsMessage::Answer { ref session_id, ref answer } if session_id == "abc" && answer == "14"));

        let msg: ClientWsMessage = serde_json::from_str(r#"{"type":"list_sessions"}"#).expect("parse");
        assert!(matches!(msg, ClientWsMessage::ListSessions));
        assert!(serde_json::from_str::<ClientWsMessage>(r#"{"type":"hint"}"#).is_err());
    }

    #[test]
    fn server_errors_are_tagged() {
        let v = serde_json::to_value(ServerWsMessage::Error { status: 404, message: "gone".into() }).expect("json");
        assert_eq!(v, serde_json::json!({"type": "error", "status": 404, "message": "gone"}));
        let v = serde_json::to_value(ServerWsMessage::Pong).expect("json");
        assert_eq!(v, serde_json::json!({"type": "pong"}));
    }
}
