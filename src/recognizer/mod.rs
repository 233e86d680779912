//! Recognition transport boundary
//!
//! The speech recognizer lives outside the daemon. A transport opens a
//! subscription for a [`StreamKind`] and pushes word events into the
//! [`StreamSink`] it was given. Every sink is stamped with a generation
//! number so the coordinator can drop events from a stream it has already
//! closed.

mod feed;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::transcript::TranscriptWord;

pub use feed::IpcFeedTransport;

/// Which subscription a stream belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Opened and closed by the mode controller
    Ambient,
    /// Opened for the lifetime of a push-to-talk capture
    PushToTalk,
}

/// Connection state of a recognition stream as shown to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn idle() -> Self {
        ConnectionState::Disconnected { reason: None }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::idle()
    }
}

/// What a transport reports for an open stream
#[derive(Debug, Clone, PartialEq)]
pub enum TransportPayload {
    Word(TranscriptWord),
    Disconnected { reason: String },
}

/// A payload tagged with the stream it came from
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub kind: StreamKind,
    pub generation: u64,
    pub payload: TransportPayload,
}

/// Write half handed to a transport when a stream is opened
#[derive(Debug, Clone)]
pub struct StreamSink {
    kind: StreamKind,
    generation: u64,
    tx: mpsc::Sender<TransportEvent>,
}

impl StreamSink {
    pub fn new(kind: StreamKind, generation: u64, tx: mpsc::Sender<TransportEvent>) -> Self {
        Self { kind, generation, tx }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver a word. Returns false once the coordinator has gone away.
    pub async fn word(&self, word: TranscriptWord) -> bool {
        self.send(TransportPayload::Word(word)).await
    }

    pub async fn disconnected(&self, reason: impl Into<String>) -> bool {
        self.send(TransportPayload::Disconnected {
            reason: reason.into(),
        })
        .await
    }

    async fn send(&self, payload: TransportPayload) -> bool {
        let event = TransportEvent {
            kind: self.kind,
            generation: self.generation,
            payload,
        };
        if self.tx.send(event).await.is_err() {
            debug!(kind = ?self.kind, "stream sink closed");
            return false;
        }
        true
    }
}

/// A source of live word events
#[async_trait]
pub trait RecognitionTransport: Send + Sync {
    /// Open a stream that delivers into `sink`. Must fail rather than
    /// pretend to listen when the microphone or recognizer is unavailable.
    async fn open(&self, sink: StreamSink) -> Result<(), TransportError>;

    /// Close the stream of the given kind. Closing an unopened stream is a no-op.
    async fn close(&self, kind: StreamKind);
}

/// Open `sink` on `transport`, giving up after `timeout`.
///
/// On failure the half-open stream is closed so a late open cannot start
/// delivering into a sink nobody listens to.
pub async fn open_stream(
    transport: &dyn RecognitionTransport,
    sink: StreamSink,
    timeout: Duration,
) -> Result<(), TransportError> {
    let kind = sink.kind();
    let result = match tokio::time::timeout(timeout, transport.open(sink)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(timeout.as_millis() as u64)),
    };
    if let Err(err) = &result {
        warn!(?kind, %err, "failed to open recognition stream");
        transport.close(kind).await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_tags_events() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = StreamSink::new(StreamKind::PushToTalk, 7, tx);
        assert!(sink.word(TranscriptWord::final_word("hi", 0.9, 0)).await);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, StreamKind::PushToTalk);
        assert_eq!(event.generation, 7);
        assert!(matches!(event.payload, TransportPayload::Word(_)));

        drop(rx);
        assert!(!sink.disconnected("gone").await);
    }

    /// Transport whose open never completes
    struct HangingTransport {
        closed: std::sync::Mutex<Vec<StreamKind>>,
    }

    #[async_trait]
    impl RecognitionTransport for HangingTransport {
        async fn open(&self, _sink: StreamSink) -> Result<(), TransportError> {
            std::future::pending().await
        }

        async fn close(&self, kind: StreamKind) {
            self.closed.lock().unwrap().push(kind);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_stream_times_out_and_closes() {
        let transport = HangingTransport {
            closed: std::sync::Mutex::new(Vec::new()),
        };
        let (tx, _rx) = mpsc::channel(4);
        let sink = StreamSink::new(StreamKind::PushToTalk, 1, tx);

        let err = open_stream(&transport, sink, Duration::from_millis(250))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Timeout(250));
        assert_eq!(*transport.closed.lock().unwrap(), vec![StreamKind::PushToTalk]);
    }

    #[test]
    fn test_connection_state_serialization() {
        let json = serde_json::to_string(&ConnectionState::Connected).unwrap();
        assert_eq!(json, r#"{"state":"connected"}"#);
        let json = serde_json::to_string(&ConnectionState::Disconnected {
            reason: Some("socket closed".into()),
        })
        .unwrap();
        assert!(json.contains("socket closed"));
    }
}
