//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::session::SessionSnapshot;
use crate::state::{ActiveBehavior, Mode};
use crate::transcript::{ProfileName, TranscriptWord};

/// Largest accepted message body
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from clients (UI, recognizer) to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Subscribe to session event notifications
    Subscribe,

    SetMode { mode: Mode },

    SetBehavior { behavior: ActiveBehavior },

    SetProfile { profile: ProfileName },

    SetCustomProfile {
        confidence_threshold: f32,
        silence_threshold_ms: u64,
    },

    ForceEndUtterance,

    BeginPtt {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sticky: Option<bool>,
    },

    EndPtt,

    SubmitCommand { text: String },

    InterruptCommand,

    SwitchAssistantSession { session_id: String },

    Reconnect,

    /// Word event from the external recognizer
    FeedWord { word: TranscriptWord },

    /// The external recognizer lost its audio or backend connection
    FeedDisconnected { reason: String },
}

/// Responses from daemon to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Command applied
    Ok,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

impl From<SessionError> for Response {
    fn from(err: SessionError) -> Self {
        Response::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Push notification for subscribed clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Event { event: SessionEvent },
}

/// Full daemon status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub hotkeys_available: bool,
    pub session: SessionSnapshot,
}
