//! Read-only view of the session published after every change

use serde::{Deserialize, Serialize};

use crate::assistant::CommandMessage;
use crate::error::SessionError;
use crate::ptt::PttState;
use crate::recognizer::ConnectionState;
use crate::state::{ActiveBehavior, Mode};
use crate::transcript::{TranscriptTurn, TranscriptWord, UtteranceProfile};

/// Remaining time on the inactivity timers, when armed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_sleep_in_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_off_in_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub mode: Mode,
    pub behavior: ActiveBehavior,
    pub profile: UtteranceProfile,
    pub connection: ConnectionState,
    /// Ambient stream open and delivering words
    pub listening: bool,
    pub in_progress: Vec<TranscriptWord>,
    /// Finalized turns, oldest first, capped by the configured history limit
    pub turns: Vec<TranscriptTurn>,
    pub ptt: PttState,
    pub messages: Vec<CommandMessage>,
    pub queue_len: usize,
    pub assistant_busy: bool,
    pub session_id: String,
    pub timers: TimerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<SessionError>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            mode: Mode::Off,
            behavior: ActiveBehavior::default(),
            profile: UtteranceProfile::default(),
            connection: ConnectionState::idle(),
            listening: false,
            in_progress: Vec::new(),
            turns: Vec::new(),
            ptt: PttState::default(),
            messages: Vec::new(),
            queue_len: 0,
            assistant_busy: false,
            session_id: String::new(),
            timers: TimerStatus::default(),
            last_error: None,
        }
    }
}
