//! Push-to-talk capture
//!
//! A press opens a dedicated recognition subscription and starts buffering
//! finalized words, whatever the current mode is. Release (or a second
//! press in sticky mode) waits briefly for in-flight words to settle, then
//! hands the buffered text back to the coordinator for injection.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::recognizer::{self, RecognitionTransport, StreamKind, StreamSink, TransportEvent};
use crate::transcript::TranscriptWord;

/// Observable push-to-talk state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PttState {
    pub is_active: bool,
    pub is_sticky: bool,
    pub buffered_text: String,
    pub is_processing: bool,
}

/// Result of a press, release or incoming event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PttOutcome {
    Started { sticky: bool },
    /// Capture ended; waiting for in-flight words
    Processing,
    /// Session closed. `None` when nothing was captured.
    Flushed(Option<String>),
    Ignored,
}

/// One capture, from press to flush
#[derive(Debug)]
struct Capture {
    is_sticky: bool,
    is_processing: bool,
    finals: Vec<TranscriptWord>,
    /// Interim words not yet confirmed by the recognizer
    pending: Vec<TranscriptWord>,
    finalize_deadline: Option<Instant>,
    /// Latest recognizer timestamp heard, final or not
    heard_through: Option<u64>,
    started_at: Instant,
}

impl Capture {
    fn new(is_sticky: bool, now: Instant) -> Self {
        Self {
            is_sticky,
            is_processing: false,
            finals: Vec::new(),
            pending: Vec::new(),
            finalize_deadline: None,
            heard_through: None,
            started_at: now,
        }
    }

    fn ingest(&mut self, word: TranscriptWord) {
        let text = word.text.trim();
        if text.is_empty() {
            return;
        }
        let ts = word.timestamp_ms;
        self.heard_through = Some(self.heard_through.map_or(ts, |h| h.max(ts)));

        if !word.is_final {
            self.pending.retain(|w| w.timestamp_ms < ts);
            self.pending.push(word);
            return;
        }

        self.pending.retain(|w| w.timestamp_ms > ts);

        if let Some(existing) = self.finals.iter_mut().find(|w| w.timestamp_ms == ts) {
            *existing = word;
            return;
        }

        // Recognizers sometimes repeat the tail of what they already finalized
        let last_ts = self.finals.last().map(|w| w.timestamp_ms);
        if matches!(last_ts, Some(last) if ts < last) && self.text().ends_with(text) {
            debug!(text, "skipping duplicate trailing fragment");
            return;
        }

        self.finals.push(word);
    }

    fn text(&self) -> String {
        self.finals
            .iter()
            .map(|w| w.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn state(&self) -> PttState {
        PttState {
            is_active: true,
            is_sticky: self.is_sticky,
            buffered_text: self.text(),
            is_processing: self.is_processing,
        }
    }
}

/// Owner of the push-to-talk buffer and its recognition subscription
pub struct PushToTalkSession {
    capture: Option<Capture>,
    generation: u64,
    /// Span covered by the last flushed capture
    heard_through: Option<u64>,
    finalize_timeout: Duration,
    connect_timeout: Duration,
    transport: Arc<dyn RecognitionTransport>,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl PushToTalkSession {
    pub fn new(
        finalize_timeout: Duration,
        connect_timeout: Duration,
        transport: Arc<dyn RecognitionTransport>,
        events_tx: mpsc::Sender<TransportEvent>,
    ) -> Self {
        Self {
            capture: None,
            generation: 0,
            heard_through: None,
            finalize_timeout,
            connect_timeout,
            transport,
            events_tx,
        }
    }

    pub fn is_active(&self) -> bool {
        self.capture.is_some()
    }

    pub fn state(&self) -> PttState {
        self.capture.as_ref().map(Capture::state).unwrap_or_default()
    }

    /// Latest recognizer timestamp heard by the last flushed capture
    pub fn heard_through(&self) -> Option<u64> {
        self.heard_through
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.capture.as_ref().and_then(|c| c.finalize_deadline)
    }

    /// Hotkey pressed. Starts a capture, or ends a sticky one.
    pub async fn press(&mut self, sticky: bool, now: Instant) -> Result<PttOutcome, SessionError> {
        match &self.capture {
            None => {}
            Some(capture) if capture.is_sticky && !capture.is_processing => {
                debug!("second press ends sticky capture");
                return Ok(self.end_capture(now).await);
            }
            Some(_) => return Ok(PttOutcome::Ignored),
        }

        self.generation += 1;
        let sink = StreamSink::new(StreamKind::PushToTalk, self.generation, self.events_tx.clone());
        let opened = recognizer::open_stream(&*self.transport, sink, self.connect_timeout).await;
        if let Err(err) = opened {
            warn!(%err, "push-to-talk capture not started");
            self.generation += 1;
            return Err(err.into());
        }
        self.heard_through = None;

        info!(sticky, "push-to-talk capture started");
        self.capture = Some(Capture::new(sticky, now));
        Ok(PttOutcome::Started { sticky })
    }

    /// Hotkey released. Ignored for sticky captures.
    pub async fn release(&mut self, now: Instant) -> PttOutcome {
        match &self.capture {
            Some(capture) if !capture.is_sticky && !capture.is_processing => {
                self.end_capture(now).await
            }
            Some(capture) if capture.is_sticky => {
                debug!("release ignored during sticky capture");
                PttOutcome::Ignored
            }
            _ => PttOutcome::Ignored,
        }
    }

    async fn end_capture(&mut self, now: Instant) -> PttOutcome {
        let timeout = self.finalize_timeout;
        let Some(capture) = self.capture.as_mut() else {
            return PttOutcome::Ignored;
        };
        capture.is_processing = true;

        if capture.pending.is_empty() {
            return self.flush().await;
        }
        debug!(pending = capture.pending.len(), "waiting for in-flight words");
        capture.finalize_deadline = Some(now + timeout);
        PttOutcome::Processing
    }

    /// A word arrived on the push-to-talk stream
    pub async fn on_word(&mut self, generation: u64, word: TranscriptWord) -> PttOutcome {
        if generation != self.generation {
            debug!(generation, "ignoring word from a closed push-to-talk stream");
            return PttOutcome::Ignored;
        }
        let Some(capture) = self.capture.as_mut() else {
            return PttOutcome::Ignored;
        };

        capture.ingest(word);
        if capture.is_processing && capture.pending.is_empty() {
            return self.flush().await;
        }
        PttOutcome::Ignored
    }

    /// The push-to-talk stream dropped; flush whatever was finalized
    pub async fn on_disconnected(&mut self, generation: u64, reason: &str) -> PttOutcome {
        if generation != self.generation || self.capture.is_none() {
            return PttOutcome::Ignored;
        }
        warn!(reason, "push-to-talk stream lost, flushing buffered words");
        self.flush().await
    }

    /// Flush once the finalize timeout has elapsed
    pub async fn poll(&mut self, now: Instant) -> PttOutcome {
        match self.next_deadline() {
            Some(deadline) if now >= deadline => {
                debug!("finalize timeout elapsed");
                self.flush().await
            }
            _ => PttOutcome::Ignored,
        }
    }

    /// Drop the capture without injecting anything
    pub async fn cancel(&mut self) {
        if self.capture.take().is_some() {
            self.close_stream().await;
            info!("push-to-talk capture cancelled");
        }
    }

    async fn flush(&mut self) -> PttOutcome {
        let Some(capture) = self.capture.take() else {
            return PttOutcome::Ignored;
        };
        self.close_stream().await;
        self.heard_through = capture.heard_through;

        let text = capture.text();
        info!(
            chars = text.len(),
            held_ms = capture.started_at.elapsed().as_millis() as u64,
            "push-to-talk capture flushed"
        );
        PttOutcome::Flushed((!text.is_empty()).then_some(text))
    }

    async fn close_stream(&mut self) {
        self.transport.close(StreamKind::PushToTalk).await;
        self.generation += 1;
    }
}
