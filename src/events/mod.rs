//! Session events
//!
//! Discrete state changes fanned out to subscribers (the menu bar app and
//! any other IPC client). The full picture is always available as a
//! snapshot; events say what just happened.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assistant::MessageStatus;
use crate::error::SessionError;
use crate::recognizer::ConnectionState;
use crate::state::ModeChange;
use crate::transcript::TranscriptTurn;

/// Where injected text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectSource {
    Dictation,
    PushToTalk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    ModeChanged(ModeChange),

    ConnectionChanged { connection: ConnectionState },

    TurnFinalized { turn: TranscriptTurn },

    /// Text handed to the injector
    TextInjected { text: String, source: InjectSource },

    PttStarted { sticky: bool },

    /// Push-to-talk released, waiting for in-flight words
    PttProcessing,

    PttFlushed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },

    CommandDispatched { message_id: Uuid, text: String },

    CommandQueued { text: String, position: usize },

    CommandFinished { message_id: Uuid, status: MessageStatus },

    SessionSwitched { session_id: String, dropped: usize },

    Error { error: SessionError },
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::ModeChanged(change) => {
                write!(f, "MODE_CHANGED {} -> {} ({:?})", change.from, change.to, change.cause)
            }
            SessionEvent::ConnectionChanged { connection } => {
                write!(f, "CONNECTION_CHANGED ({connection:?})")
            }
            SessionEvent::TurnFinalized { turn } => {
                write!(f, "TURN_FINALIZED ({} words)", turn.words().len())
            }
            SessionEvent::TextInjected { text, source } => {
                write!(f, "TEXT_INJECTED ({source:?}, {} chars)", text.len())
            }
            SessionEvent::PttStarted { sticky } => write!(f, "PTT_STARTED (sticky: {sticky})"),
            SessionEvent::PttProcessing => write!(f, "PTT_PROCESSING"),
            SessionEvent::PttFlushed { text } => {
                write!(f, "PTT_FLUSHED ({} chars)", text.as_deref().map_or(0, str::len))
            }
            SessionEvent::CommandDispatched { message_id, .. } => {
                write!(f, "COMMAND_DISPATCHED ({message_id})")
            }
            SessionEvent::CommandQueued { position, .. } => {
                write!(f, "COMMAND_QUEUED (position {position})")
            }
            SessionEvent::CommandFinished { message_id, status } => {
                write!(f, "COMMAND_FINISHED ({message_id}, {status:?})")
            }
            SessionEvent::SessionSwitched { session_id, dropped } => {
                write!(f, "SESSION_SWITCHED ({session_id}, dropped {dropped})")
            }
            SessionEvent::Error { error } => write!(f, "ERROR ({})", error.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Mode, TransitionCause};

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent::ModeChanged(ModeChange {
            from: Mode::On,
            to: Mode::Sleep,
            cause: TransitionCause::AutoSleep,
            duration_ms: 1500,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"mode_changed""#));
        assert!(json.contains(r#""cause":"auto_sleep""#));
        assert!(json.contains("1500"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"ptt_flushed","text":"hello world"}"#;
        let event: SessionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            SessionEvent::PttFlushed {
                text: Some("hello world".into())
            }
        );

        let empty: SessionEvent = serde_json::from_str(r#"{"type":"ptt_flushed"}"#).unwrap();
        assert_eq!(empty, SessionEvent::PttFlushed { text: None });
    }

    #[test]
    fn test_error_event_carries_kind() {
        let event = SessionEvent::Error {
            error: SessionError::Closed,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""kind":"closed""#));
        assert_eq!(event.to_string(), "ERROR (closed)");
    }
}
