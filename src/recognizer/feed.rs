//! Transport fed over IPC by an external recognizer process
//!
//! The recognizer connects to the daemon socket and pushes `feed_word`
//! requests. Each word is fanned out to every open subscription, so the
//! ambient stream and a push-to-talk capture both hear the same speech.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::TransportError;
use crate::transcript::TranscriptWord;

use super::{RecognitionTransport, StreamKind, StreamSink};

#[derive(Debug, Default)]
pub struct IpcFeedTransport {
    sinks: Mutex<HashMap<StreamKind, StreamSink>>,
}

impl IpcFeedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a word to every open stream. Returns how many streams received it.
    pub async fn push_word(&self, word: TranscriptWord) -> usize {
        // Never hold the lock across a send: the coordinator may be
        // waiting on this same lock inside open/close.
        let sinks: Vec<StreamSink> = self.sinks.lock().await.values().cloned().collect();

        let mut delivered = 0;
        for sink in sinks {
            if sink.word(word.clone()).await {
                delivered += 1;
            }
        }
        if delivered == 0 {
            debug!(text = %word.text, "no open stream for fed word");
        }
        delivered
    }

    /// The recognizer went away; report it on every open stream
    pub async fn disconnect_all(&self, reason: &str) {
        let sinks: Vec<StreamSink> = self.sinks.lock().await.drain().map(|(_, s)| s).collect();
        info!(streams = sinks.len(), reason, "recognizer feed disconnected");
        for sink in sinks {
            sink.disconnected(reason).await;
        }
    }

    pub async fn open_streams(&self) -> Vec<StreamKind> {
        self.sinks.lock().await.keys().copied().collect()
    }
}

#[async_trait]
impl RecognitionTransport for IpcFeedTransport {
    async fn open(&self, sink: StreamSink) -> Result<(), TransportError> {
        debug!(kind = ?sink.kind(), generation = sink.generation(), "feed stream opened");
        self.sinks.lock().await.insert(sink.kind(), sink);
        Ok(())
    }

    async fn close(&self, kind: StreamKind) {
        if self.sinks.lock().await.remove(&kind).is_some() {
            debug!(?kind, "feed stream closed");
        }
    }
}
