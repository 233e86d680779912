//! Cloneable front door to a running session coordinator

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;

use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::state::{ActiveBehavior, Mode};
use crate::transcript::ProfileName;

use super::snapshot::SessionSnapshot;

/// A command for the coordinator, answered once it has been applied
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    SetMode(Mode),
    SetBehavior(ActiveBehavior),
    SetProfile(ProfileName),
    SetCustomProfile {
        confidence_threshold: f32,
        silence_threshold_ms: u64,
    },
    ForceEndUtterance,
    /// `None` uses the configured push-to-talk discipline
    BeginPtt { sticky: Option<bool> },
    EndPtt,
    SubmitCommand(String),
    InterruptCommand,
    SwitchAssistantSession(String),
    Reconnect,
    Shutdown,
}

pub(crate) struct Envelope {
    pub(crate) command: SessionCommand,
    pub(crate) reply: oneshot::Sender<Result<(), SessionError>>,
}

#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Envelope>,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Envelope>,
        snapshot: watch::Receiver<SessionSnapshot>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            commands,
            snapshot,
            events,
        }
    }

    /// Send a command and wait for the coordinator to apply it
    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        debug!(?command, "session command");
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Envelope { command, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn set_mode(&self, mode: Mode) -> Result<(), SessionError> {
        self.send(SessionCommand::SetMode(mode)).await
    }

    pub async fn set_behavior(&self, behavior: ActiveBehavior) -> Result<(), SessionError> {
        self.send(SessionCommand::SetBehavior(behavior)).await
    }

    pub async fn set_profile(&self, name: ProfileName) -> Result<(), SessionError> {
        self.send(SessionCommand::SetProfile(name)).await
    }

    pub async fn set_custom_profile(
        &self,
        confidence_threshold: f32,
        silence_threshold_ms: u64,
    ) -> Result<(), SessionError> {
        self.send(SessionCommand::SetCustomProfile {
            confidence_threshold,
            silence_threshold_ms,
        })
        .await
    }

    pub async fn force_end_utterance(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::ForceEndUtterance).await
    }

    pub async fn begin_ptt(&self, sticky: Option<bool>) -> Result<(), SessionError> {
        self.send(SessionCommand::BeginPtt { sticky }).await
    }

    pub async fn end_ptt(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::EndPtt).await
    }

    pub async fn submit_command(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionCommand::SubmitCommand(text.into())).await
    }

    pub async fn interrupt_command(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::InterruptCommand).await
    }

    pub async fn switch_assistant_session(
        &self,
        session_id: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.send(SessionCommand::SwitchAssistantSession(session_id.into()))
            .await
    }

    pub async fn reconnect(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Reconnect).await
    }

    /// Turn the microphone off, cancel captures and stop the coordinator
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Shutdown).await
    }

    /// Latest published state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that is notified whenever a new snapshot is published
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}
