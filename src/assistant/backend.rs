//! Assistant backend boundary
//!
//! A backend runs one turn at a time: it streams [`TurnEvent`]s into the
//! [`TurnSink`] it is handed and resolves when the reply is done. The queue
//! runs each turn on its own task and aborts that task to interrupt it.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::AssistantError;

/// Streaming output of a single assistant turn
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    ContentDelta(String),
    ToolUseStarted {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolUseFinished {
        id: String,
        output: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssistantEventKind {
    Stream(TurnEvent),
    Completed,
    Failed(AssistantError),
}

/// An event tagged with the turn it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantEvent {
    pub turn_id: u64,
    pub kind: AssistantEventKind,
}

/// Write half handed to the backend for one turn
#[derive(Debug, Clone)]
pub struct TurnSink {
    turn_id: u64,
    tx: mpsc::Sender<AssistantEvent>,
}

impl TurnSink {
    pub fn new(turn_id: u64, tx: mpsc::Sender<AssistantEvent>) -> Self {
        Self { turn_id, tx }
    }

    pub fn turn_id(&self) -> u64 {
        self.turn_id
    }

    pub async fn send(&self, event: TurnEvent) -> bool {
        self.emit(AssistantEventKind::Stream(event)).await
    }

    pub async fn delta(&self, text: impl Into<String>) -> bool {
        self.send(TurnEvent::ContentDelta(text.into())).await
    }

    /// Report how the turn ended
    pub async fn finish(&self, result: Result<(), AssistantError>) -> bool {
        let kind = match result {
            Ok(()) => AssistantEventKind::Completed,
            Err(err) => AssistantEventKind::Failed(err),
        };
        self.emit(kind).await
    }

    async fn emit(&self, kind: AssistantEventKind) -> bool {
        let event = AssistantEvent {
            turn_id: self.turn_id,
            kind,
        };
        if self.tx.send(event).await.is_err() {
            debug!(turn_id = self.turn_id, "assistant event receiver closed");
            return false;
        }
        true
    }
}

/// A streaming conversational backend
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    /// Run one turn to completion, streaming output into `sink`
    async fn start_turn(
        &self,
        session_id: &str,
        text: &str,
        sink: TurnSink,
    ) -> Result<(), AssistantError>;

    /// Hint that the running turn was cancelled. The queue has already
    /// dropped the turn's task by the time this is called.
    async fn interrupt_turn(&self) {}
}

/// Backend used when no assistant command is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredBackend;

#[async_trait]
impl AssistantBackend for UnconfiguredBackend {
    async fn start_turn(
        &self,
        _session_id: &str,
        _text: &str,
        _sink: TurnSink,
    ) -> Result<(), AssistantError> {
        Err(AssistantError::Unavailable)
    }
}
