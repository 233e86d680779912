//! Assistant command queue
//!
//! At most one turn is in flight. Later submissions wait in FIFO order and
//! are dispatched one by one as each turn completes, fails or is
//! interrupted. Interrupting only ever touches the in-flight turn.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SessionError;

use super::backend::{AssistantBackend, AssistantEvent, AssistantEventKind, TurnEvent, TurnSink};
use super::message::{CommandMessage, MessageStatus};

/// What changed in the queue, for the coordinator to publish
#[derive(Debug, Clone, PartialEq)]
pub enum QueueNotice {
    Dispatched { message_id: Uuid, text: String },
    Queued { text: String, position: usize },
    Finished { message_id: Uuid, status: MessageStatus },
    SessionSwitched { session_id: String, dropped: usize },
}

struct InFlight {
    turn_id: u64,
    /// Assistant message receiving the streamed reply
    message_id: Uuid,
    task: JoinHandle<()>,
}

pub struct AssistantCommandQueue {
    backend: Arc<dyn AssistantBackend>,
    events_tx: mpsc::Sender<AssistantEvent>,
    session_id: String,
    messages: Vec<CommandMessage>,
    waiting: VecDeque<String>,
    in_flight: Option<InFlight>,
    next_turn_id: u64,
}

impl AssistantCommandQueue {
    pub fn new(
        backend: Arc<dyn AssistantBackend>,
        session_id: impl Into<String>,
        events_tx: mpsc::Sender<AssistantEvent>,
    ) -> Self {
        Self {
            backend,
            events_tx,
            session_id: session_id.into(),
            messages: Vec::new(),
            waiting: VecDeque::new(),
            in_flight: None,
            next_turn_id: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn messages(&self) -> &[CommandMessage] {
        &self.messages
    }

    /// Texts waiting behind the in-flight turn, oldest first
    pub fn waiting(&self) -> impl Iterator<Item = &str> {
        self.waiting.iter().map(String::as_str)
    }

    pub fn queue_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Dispatch now if idle, otherwise queue behind the in-flight turn
    pub fn submit(&mut self, text: impl Into<String>) -> Result<QueueNotice, SessionError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(SessionError::InvalidCommand {
                reason: "command text is empty".into(),
            });
        }

        if self.in_flight.is_some() {
            self.waiting.push_back(text.clone());
            let position = self.waiting.len();
            debug!(position, "command queued");
            return Ok(QueueNotice::Queued { text, position });
        }
        Ok(self.dispatch(text))
    }

    fn dispatch(&mut self, text: String) -> QueueNotice {
        debug_assert!(self.in_flight.is_none(), "dispatch while a turn is in flight");

        self.next_turn_id += 1;
        let turn_id = self.next_turn_id;

        self.messages.push(CommandMessage::user(text.clone()));
        let reply = CommandMessage::assistant_pending();
        let message_id = reply.id;
        self.messages.push(reply);

        let backend = Arc::clone(&self.backend);
        let session_id = self.session_id.clone();
        let sink = TurnSink::new(turn_id, self.events_tx.clone());
        let prompt = text.clone();
        let task = tokio::spawn(async move {
            let result = backend.start_turn(&session_id, &prompt, sink.clone()).await;
            sink.finish(result).await;
        });

        info!(turn_id, %message_id, session = %self.session_id, "assistant turn dispatched");
        self.in_flight = Some(InFlight {
            turn_id,
            message_id,
            task,
        });
        QueueNotice::Dispatched { message_id, text }
    }

    /// Start the next waiting command, if any
    fn drain_next(&mut self) -> Option<QueueNotice> {
        if self.in_flight.is_some() {
            return None;
        }
        let text = self.waiting.pop_front()?;
        Some(self.dispatch(text))
    }

    fn message_mut(&mut self, id: Uuid) -> Option<&mut CommandMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Apply an event from a running turn
    pub fn on_event(&mut self, event: AssistantEvent, now: Instant) -> Vec<QueueNotice> {
        let message_id = match &self.in_flight {
            Some(flight) if flight.turn_id == event.turn_id => flight.message_id,
            _ => {
                debug!(turn_id = event.turn_id, "ignoring event from a finished turn");
                return Vec::new();
            }
        };

        let status = match event.kind {
            AssistantEventKind::Stream(stream) => {
                if let Some(message) = self.message_mut(message_id) {
                    match stream {
                        TurnEvent::ContentDelta(delta) => message.append(&delta),
                        TurnEvent::ToolUseStarted { id, name, input } => {
                            message.start_tool(id, name, input, now)
                        }
                        TurnEvent::ToolUseFinished { id, output } => {
                            if !message.finish_tool(&id, output, now) {
                                warn!(tool_id = %id, "result for unknown tool use");
                            }
                        }
                    }
                }
                return Vec::new();
            }
            AssistantEventKind::Completed => {
                if let Some(message) = self.message_mut(message_id) {
                    message.close(MessageStatus::Complete);
                }
                MessageStatus::Complete
            }
            AssistantEventKind::Failed(err) => {
                warn!(%err, %message_id, "assistant turn failed");
                if let Some(message) = self.message_mut(message_id) {
                    message.fail(err.into());
                }
                MessageStatus::Failed
            }
        };

        self.in_flight = None;
        let mut notices = vec![QueueNotice::Finished { message_id, status }];
        notices.extend(self.drain_next());
        notices
    }

    /// Cancel the in-flight turn and move on to the next waiting command
    pub async fn interrupt(&mut self) -> Vec<QueueNotice> {
        let Some(notice) = self.cancel_in_flight().await else {
            debug!("interrupt with nothing in flight");
            return Vec::new();
        };
        let mut notices = vec![notice];
        notices.extend(self.drain_next());
        notices
    }

    async fn cancel_in_flight(&mut self) -> Option<QueueNotice> {
        let flight = self.in_flight.take()?;
        flight.task.abort();
        self.backend.interrupt_turn().await;

        if let Some(message) = self.message_mut(flight.message_id) {
            message.close(MessageStatus::Interrupted);
        }
        info!(turn_id = flight.turn_id, message_id = %flight.message_id, "assistant turn interrupted");
        Some(QueueNotice::Finished {
            message_id: flight.message_id,
            status: MessageStatus::Interrupted,
        })
    }

    /// Switch conversation context. The in-flight turn is interrupted, the
    /// waiting queue is dropped and the message history is cleared, since
    /// none of it belongs to the new session.
    pub async fn switch_session(&mut self, session_id: impl Into<String>) -> Vec<QueueNotice> {
        let session_id = session_id.into();
        if session_id == self.session_id {
            return Vec::new();
        }

        let mut notices: Vec<QueueNotice> = self.cancel_in_flight().await.into_iter().collect();
        let dropped = self.waiting.len();
        self.waiting.clear();
        self.messages.clear();

        info!(from = %self.session_id, to = %session_id, dropped, "assistant session switched");
        self.session_id = session_id.clone();
        notices.push(QueueNotice::SessionSwitched {
            session_id,
            dropped,
        });
        notices
    }

    /// Abort any running turn without dispatching more
    pub async fn shutdown(&mut self) {
        self.waiting.clear();
        self.cancel_in_flight().await;
    }
}
