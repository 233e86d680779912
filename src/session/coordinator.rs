//! Session coordinator
//!
//! A single task owns the mode controller, the push-to-talk session and the
//! assistant queue. Commands, hotkey signals, recognition events, assistant
//! events and the nearest component deadline are all funneled through one
//! `select!` loop, so every state change is serialized. After each input
//! the coordinator publishes a fresh [`SessionSnapshot`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::assistant::{AssistantBackend, AssistantCommandQueue, AssistantEvent, QueueNotice};
use crate::error::SessionError;
use crate::events::{InjectSource, SessionEvent};
use crate::hotkey::HotkeySignal;
use crate::inject::TextInjector;
use crate::ptt::{PttOutcome, PushToTalkSession};
use crate::recognizer::{
    ConnectionState, RecognitionTransport, StreamKind, TransportEvent, TransportPayload,
};
use crate::state::{
    Mode, ModeChange, ModeController, ModeSettings, ReconnectFailure, TimerKind, TransitionCause,
    TurnAction,
};
use crate::transcript::TranscriptTurn;

use super::handle::{Envelope, SessionCommand, SessionHandle};
use super::snapshot::{SessionSnapshot, TimerStatus};

/// Everything the coordinator needs to build its components
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: ModeSettings,
    /// Mode entered as soon as the coordinator starts
    pub start_mode: Mode,
    pub ptt_sticky: bool,
    pub ptt_finalize_timeout: Duration,
    pub assistant_session_id: String,
    pub turn_history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: ModeSettings::default(),
            start_mode: Mode::Off,
            ptt_sticky: false,
            ptt_finalize_timeout: Duration::from_millis(1200),
            assistant_session_id: "default".into(),
            turn_history_limit: 200,
        }
    }
}

/// State owned by the coordinator task
struct Session {
    controller: ModeController,
    ptt: PushToTalkSession,
    queue: AssistantCommandQueue,
    injector: Arc<dyn TextInjector>,
    turns: VecDeque<TranscriptTurn>,
    turn_history_limit: usize,
    ptt_sticky: bool,
    last_error: Option<SessionError>,
    /// Something was typed since the microphone was last off
    passage_started: bool,
    last_connection: ConnectionState,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    events_tx: broadcast::Sender<SessionEvent>,
}

pub struct SessionCoordinator {
    session: Session,
    start_mode: Mode,
    commands_rx: mpsc::Receiver<Envelope>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    assistant_rx: mpsc::Receiver<AssistantEvent>,
}

impl SessionCoordinator {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn RecognitionTransport>,
        injector: Arc<dyn TextInjector>,
        backend: Arc<dyn AssistantBackend>,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (transport_tx, transport_rx) = mpsc::channel(256);
        let (assistant_tx, assistant_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(256);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let connect_timeout = config.mode.connect_timeout;
        let controller =
            ModeController::new(config.mode, Arc::clone(&transport), transport_tx.clone());
        let ptt = PushToTalkSession::new(
            config.ptt_finalize_timeout,
            connect_timeout,
            transport,
            transport_tx,
        );
        let queue = AssistantCommandQueue::new(backend, config.assistant_session_id, assistant_tx);

        let mut session = Session {
            last_connection: controller.connection().clone(),
            controller,
            ptt,
            queue,
            injector,
            turns: VecDeque::new(),
            turn_history_limit: config.turn_history_limit,
            ptt_sticky: config.ptt_sticky,
            last_error: None,
            passage_started: false,
            snapshot_tx,
            events_tx: events_tx.clone(),
        };
        session.publish();

        let handle = SessionHandle::new(commands_tx, snapshot_rx, events_tx);
        let coordinator = Self {
            session,
            start_mode: config.start_mode,
            commands_rx,
            transport_rx,
            assistant_rx,
        };
        (coordinator, handle)
    }

    /// Run until a shutdown command arrives or every handle is dropped
    pub async fn run(self, mut hotkeys: mpsc::Receiver<HotkeySignal>) {
        let SessionCoordinator {
            mut session,
            start_mode,
            mut commands_rx,
            mut transport_rx,
            mut assistant_rx,
        } = self;

        session.start(start_mode).await;
        session.publish();
        let mut hotkeys_open = true;

        loop {
            let deadline = session.next_deadline();

            tokio::select! {
                envelope = commands_rx.recv() => {
                    let Some(Envelope { command, reply }) = envelope else {
                        info!("all session handles dropped");
                        session.shutdown().await;
                        break;
                    };
                    let stop = matches!(command, SessionCommand::Shutdown);
                    let result = session.handle_command(command).await;
                    // Callers observe the new state as soon as they are answered
                    session.publish();
                    let _ = reply.send(result);
                    if stop {
                        break;
                    }
                }
                signal = hotkeys.recv(), if hotkeys_open => match signal {
                    Some(signal) => session.handle_hotkey(signal).await,
                    None => {
                        debug!("hotkey channel closed");
                        hotkeys_open = false;
                    }
                },
                Some(event) = transport_rx.recv() => session.handle_transport(event).await,
                Some(event) = assistant_rx.recv() => session.handle_assistant(event),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    session.on_deadline(Instant::now()).await;
                }
            }

            session.publish();
        }

        session.publish();
        info!("session coordinator stopped");
    }
}

impl Session {
    async fn start(&mut self, mode: Mode) {
        if mode == Mode::Off {
            return;
        }
        info!(%mode, "entering start mode");
        if let Err(err) = self.set_mode(mode, TransitionCause::Startup, Instant::now()).await {
            self.record_error(err);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        [self.controller.next_deadline(), self.ptt.next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    async fn handle_command(&mut self, command: SessionCommand) -> Result<(), SessionError> {
        let now = Instant::now();
        let result = match command {
            SessionCommand::SetMode(mode) => {
                self.set_mode(mode, TransitionCause::Explicit, now).await
            }
            SessionCommand::SetBehavior(behavior) => {
                self.controller.set_behavior(behavior);
                Ok(())
            }
            SessionCommand::SetProfile(name) => {
                self.controller.set_profile(name);
                Ok(())
            }
            SessionCommand::SetCustomProfile {
                confidence_threshold,
                silence_threshold_ms,
            } => {
                self.controller
                    .set_custom_profile(confidence_threshold, silence_threshold_ms);
                Ok(())
            }
            SessionCommand::ForceEndUtterance => {
                if let Some(turn) = self.controller.force_end() {
                    self.handle_turn(turn, now).await;
                }
                Ok(())
            }
            SessionCommand::BeginPtt { sticky } => {
                self.begin_ptt(sticky.unwrap_or(self.ptt_sticky), now).await
            }
            SessionCommand::EndPtt => self.end_ptt(now).await,
            SessionCommand::SubmitCommand(text) => self.submit(text),
            SessionCommand::InterruptCommand => {
                let notices = self.queue.interrupt().await;
                self.emit_notices(notices);
                Ok(())
            }
            SessionCommand::SwitchAssistantSession(session_id) => {
                if session_id.trim().is_empty() {
                    Err(SessionError::InvalidCommand {
                        reason: "session id is empty".into(),
                    })
                } else {
                    let notices = self.queue.switch_session(session_id).await;
                    self.emit_notices(notices);
                    Ok(())
                }
            }
            SessionCommand::Reconnect => self.reconnect(now).await,
            SessionCommand::Shutdown => {
                self.shutdown().await;
                Ok(())
            }
        };

        if let Err(err) = &result {
            if !matches!(err, SessionError::InvalidCommand { .. }) {
                self.record_error(err.clone());
            }
        }
        result
    }

    async fn handle_hotkey(&mut self, signal: HotkeySignal) {
        debug!(?signal, "hotkey");
        let now = Instant::now();
        let mode = self.controller.mode();
        let result = match signal {
            HotkeySignal::PttPressed => self.begin_ptt(self.ptt_sticky, now).await,
            HotkeySignal::PttReleased => {
                let outcome = self.ptt.release(now).await;
                self.handle_ptt(outcome).await;
                Ok(())
            }
            HotkeySignal::ToggleOnOff => {
                let target = if mode == Mode::Off { Mode::On } else { Mode::Off };
                self.set_mode(target, TransitionCause::Shortcut, now).await
            }
            HotkeySignal::ToggleSleep => {
                let target = if mode == Mode::Sleep { Mode::On } else { Mode::Sleep };
                self.set_mode(target, TransitionCause::Shortcut, now).await
            }
            HotkeySignal::ForceEnd => {
                if let Some(turn) = self.controller.force_end() {
                    self.handle_turn(turn, now).await;
                }
                Ok(())
            }
        };
        if let Err(err) = result {
            self.record_error(err);
        }
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        let now = Instant::now();
        let TransportEvent {
            kind,
            generation,
            payload,
        } = event;

        match (kind, payload) {
            (StreamKind::Ambient, TransportPayload::Word(word)) => {
                self.controller.on_word(generation, word, now);
            }
            (StreamKind::Ambient, TransportPayload::Disconnected { reason }) => {
                let was_connected = self.controller.connection().is_connected();
                let turn = self.controller.on_disconnected(generation, reason.clone());
                if was_connected && !self.controller.connection().is_connected() {
                    self.record_error(SessionError::Connection { reason });
                }
                if let Some(turn) = turn {
                    self.handle_turn(turn, now).await;
                }
            }
            (StreamKind::PushToTalk, TransportPayload::Word(word)) => {
                let outcome = self.ptt.on_word(generation, word).await;
                self.handle_ptt(outcome).await;
            }
            (StreamKind::PushToTalk, TransportPayload::Disconnected { reason }) => {
                let outcome = self.ptt.on_disconnected(generation, &reason).await;
                self.handle_ptt(outcome).await;
            }
        }
    }

    fn handle_assistant(&mut self, event: AssistantEvent) {
        let notices = self.queue.on_event(event, Instant::now());
        self.emit_notices(notices);
    }

    /// Finalize utterances, fire inactivity timers and flush push-to-talk
    /// for every deadline that has passed
    async fn on_deadline(&mut self, now: Instant) {
        if let Some(turn) = self.controller.poll_turn(now) {
            self.handle_turn(turn, now).await;
        }
        for change in self.controller.poll_timers(now).await {
            self.mode_changed(change);
        }
        let outcome = self.ptt.poll(now).await;
        self.handle_ptt(outcome).await;
    }

    async fn set_mode(
        &mut self,
        target: Mode,
        cause: TransitionCause,
        now: Instant,
    ) -> Result<(), SessionError> {
        if let Some(change) = self.controller.set_mode(target, cause, now).await? {
            if change.from == Mode::Off {
                self.last_error = None;
            }
            self.mode_changed(change);
        }
        Ok(())
    }

    async fn reconnect(&mut self, now: Instant) -> Result<(), SessionError> {
        match self.controller.reconnect(now).await {
            Ok(()) => {
                self.last_error = None;
                Ok(())
            }
            Err(ReconnectFailure { error, change }) => {
                if let Some(change) = change {
                    self.mode_changed(change);
                }
                Err(error)
            }
        }
    }

    async fn handle_turn(&mut self, turn: TranscriptTurn, now: Instant) {
        info!(
            words = turn.words().len(),
            end = ?turn.end(),
            mode = %self.controller.mode(),
            "turn finalized"
        );
        let actions = self
            .controller
            .route_turn(&turn, self.ptt.is_active(), now)
            .await;
        self.remember(turn.clone());
        self.emit(SessionEvent::TurnFinalized { turn });

        for action in actions {
            match action {
                TurnAction::ModeChanged(change) => self.mode_changed(change),
                TurnAction::Inject(text) => self.inject(text, InjectSource::Dictation).await,
                TurnAction::Submit(text) => {
                    if let Err(err) = self.submit(text) {
                        self.record_error(err);
                    }
                }
            }
        }
    }

    fn remember(&mut self, turn: TranscriptTurn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.turn_history_limit {
            self.turns.pop_front();
        }
    }

    async fn begin_ptt(&mut self, sticky: bool, now: Instant) -> Result<(), SessionError> {
        if !self.ptt.is_active() {
            // Speech before the press belongs to the ambient stream
            if let Some(turn) = self.controller.force_end() {
                self.handle_turn(turn, now).await;
            }
        }
        let outcome = self.ptt.press(sticky, now).await?;
        self.handle_ptt(outcome).await;
        Ok(())
    }

    /// Explicit end from a client: a sticky capture ends like a second
    /// press, a held one like a release
    async fn end_ptt(&mut self, now: Instant) -> Result<(), SessionError> {
        let state = self.ptt.state();
        let outcome = if state.is_active && state.is_sticky && !state.is_processing {
            self.ptt.press(true, now).await?
        } else {
            self.ptt.release(now).await
        };
        self.handle_ptt(outcome).await;
        Ok(())
    }

    async fn handle_ptt(&mut self, outcome: PttOutcome) {
        match outcome {
            PttOutcome::Started { sticky } => self.emit(SessionEvent::PttStarted { sticky }),
            PttOutcome::Processing => self.emit(SessionEvent::PttProcessing),
            PttOutcome::Flushed(text) => {
                self.emit(SessionEvent::PttFlushed { text: text.clone() });
                // The ambient stream heard the same speech
                self.controller.yield_to_capture(self.ptt.heard_through());
                if let Some(text) = text {
                    self.inject(text, InjectSource::PushToTalk).await;
                }
            }
            PttOutcome::Ignored => {}
        }
    }

    async fn inject(&mut self, text: String, source: InjectSource) {
        // Later turns continue the same passage
        let text = if self.passage_started {
            format!(" {text}")
        } else {
            text
        };
        match self.injector.inject(&text).await {
            Ok(()) => {
                debug!(?source, chars = text.len(), "text injected");
                self.passage_started = true;
                self.emit(SessionEvent::TextInjected { text, source });
            }
            Err(err) => {
                warn!(%err, ?source, "text injection failed");
                self.record_error(err.into());
            }
        }
    }

    fn submit(&mut self, text: String) -> Result<(), SessionError> {
        let notice = self.queue.submit(text)?;
        self.emit_notices(vec![notice]);
        Ok(())
    }

    async fn shutdown(&mut self) {
        info!("session shutting down");
        self.ptt.cancel().await;
        self.queue.shutdown().await;
        if let Err(err) = self
            .set_mode(Mode::Off, TransitionCause::Shutdown, Instant::now())
            .await
        {
            warn!(%err, "failed to turn microphone off during shutdown");
        }
    }

    fn emit_notices(&mut self, notices: Vec<QueueNotice>) {
        for notice in notices {
            let event = match notice {
                QueueNotice::Dispatched { message_id, text } => {
                    SessionEvent::CommandDispatched { message_id, text }
                }
                QueueNotice::Queued { text, position } => {
                    SessionEvent::CommandQueued { text, position }
                }
                QueueNotice::Finished { message_id, status } => {
                    SessionEvent::CommandFinished { message_id, status }
                }
                QueueNotice::SessionSwitched {
                    session_id,
                    dropped,
                } => SessionEvent::SessionSwitched {
                    session_id,
                    dropped,
                },
            };
            self.emit(event);
        }
    }

    fn mode_changed(&mut self, change: ModeChange) {
        if change.to == Mode::Off {
            self.passage_started = false;
        }
        self.emit(SessionEvent::ModeChanged(change));
    }

    fn record_error(&mut self, error: SessionError) {
        warn!(code = error.code(), %error, "session error");
        self.last_error = Some(error.clone());
        self.emit(SessionEvent::Error { error });
    }

    fn emit(&self, event: SessionEvent) {
        debug!(%event, "session event");
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    fn snapshot(&self, now: Instant) -> SessionSnapshot {
        let remaining = |kind| {
            self.controller
                .timer_deadline(kind)
                .map(|d: Instant| d.saturating_duration_since(now).as_millis() as u64)
        };
        SessionSnapshot {
            mode: self.controller.mode(),
            behavior: self.controller.behavior(),
            profile: *self.controller.profile(),
            connection: self.controller.connection().clone(),
            listening: self.controller.is_listening(),
            in_progress: self.controller.in_progress(),
            turns: self.turns.iter().cloned().collect(),
            ptt: self.ptt.state(),
            messages: self.queue.messages().to_vec(),
            queue_len: self.queue.queue_len(),
            assistant_busy: self.queue.is_busy(),
            session_id: self.queue.session_id().to_string(),
            timers: TimerStatus {
                auto_sleep_in_ms: remaining(TimerKind::AutoSleep),
                auto_off_in_ms: remaining(TimerKind::AutoOff),
            },
            last_error: self.last_error.clone(),
        }
    }

    fn publish(&mut self) {
        let connection = self.controller.connection();
        if *connection != self.last_connection {
            self.last_connection = connection.clone();
            self.emit(SessionEvent::ConnectionChanged {
                connection: self.last_connection.clone(),
            });
        }
        self.snapshot_tx.send_replace(self.snapshot(Instant::now()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::{MessageStatus, TurnSink};
    use crate::error::{AssistantError, InjectError, Permission, TransportError};
    use crate::recognizer::IpcFeedTransport;
    use crate::state::{ActiveBehavior, FakeTransport};
    use crate::transcript::TranscriptWord;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingInjector {
        injected: Mutex<Vec<String>>,
        fail: Mutex<Option<InjectError>>,
    }

    impl RecordingInjector {
        fn texts(&self) -> Vec<String> {
            self.injected.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextInjector for RecordingInjector {
        async fn inject(&self, text: &str) -> Result<(), InjectError> {
            if let Some(err) = self.fail.lock().unwrap().clone() {
                return Err(err);
            }
            self.injected.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct EchoBackend;

    #[async_trait]
    impl AssistantBackend for EchoBackend {
        async fn start_turn(
            &self,
            _session_id: &str,
            text: &str,
            sink: TurnSink,
        ) -> Result<(), AssistantError> {
            sink.delta(format!("echo: {text}")).await;
            Ok(())
        }
    }

    struct Harness {
        handle: SessionHandle,
        feed: Arc<IpcFeedTransport>,
        injector: Arc<RecordingInjector>,
        _hotkeys: mpsc::Sender<HotkeySignal>,
    }

    fn spawn(config: SessionConfig) -> Harness {
        let feed = Arc::new(IpcFeedTransport::new());
        let injector = Arc::new(RecordingInjector::default());
        let (coordinator, handle) = SessionCoordinator::new(
            config,
            feed.clone(),
            injector.clone(),
            Arc::new(EchoBackend),
        );
        let (hotkeys_tx, hotkeys_rx) = mpsc::channel(8);
        tokio::spawn(coordinator.run(hotkeys_rx));
        Harness {
            handle,
            feed,
            injector,
            _hotkeys: hotkeys_tx,
        }
    }

    /// Let the coordinator drain everything that is ready
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn say(feed: &IpcFeedTransport, words: &[&str], start_ts: u64) {
        for (i, text) in words.iter().enumerate() {
            feed.push_word(TranscriptWord::final_word(*text, 0.9, start_ts + i as u64 * 100))
                .await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dictated_turn_is_injected_after_silence() {
        let h = spawn(SessionConfig::default());
        h.handle.set_mode(Mode::On).await.unwrap();
        assert!(h.handle.snapshot().listening);

        say(&h.feed, &["hello", "world"], 0).await;
        settle().await;
        assert_eq!(h.handle.snapshot().in_progress.len(), 2);
        assert!(h.injector.texts().is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.injector.texts(), vec!["hello world"]);
        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.turns.len(), 1);
        assert!(snapshot.in_progress.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_phrase_then_wake_phrase() {
        let h = spawn(SessionConfig::default());
        let mut events = h.handle.subscribe();
        h.handle.set_mode(Mode::On).await.unwrap();

        say(&h.feed, &["microphone", "off"], 0).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.handle.snapshot().mode, Mode::Sleep);

        say(&h.feed, &["this", "is", "ignored"], 1000).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.handle.snapshot().mode, Mode::Sleep);

        say(&h.feed, &["microphone", "on"], 2000).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.handle.snapshot().mode, Mode::On);
        assert!(h.injector.texts().is_empty());

        let mut causes = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::ModeChanged(change) = event {
                causes.push((change.to, change.cause));
            }
        }
        assert_eq!(
            causes,
            vec![
                (Mode::On, TransitionCause::Explicit),
                (Mode::Sleep, TransitionCause::Keyword),
                (Mode::On, TransitionCause::Keyword),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ptt_while_off_injects_once_and_keeps_mode() {
        let h = spawn(SessionConfig::default());
        h.handle.begin_ptt(None).await.unwrap();
        assert!(h.handle.snapshot().ptt.is_active);

        say(&h.feed, &["quick", "note"], 0).await;
        settle().await;
        assert_eq!(h.handle.snapshot().ptt.buffered_text, "quick note");

        h.handle.end_ptt().await.unwrap();
        assert_eq!(h.injector.texts(), vec!["quick note"]);
        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.mode, Mode::Off);
        assert!(!snapshot.ptt.is_active);
        assert!(h.feed.open_streams().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ptt_suppresses_ambient_injection() {
        let h = spawn(SessionConfig::default());
        h.handle.set_mode(Mode::On).await.unwrap();
        h.handle.begin_ptt(Some(false)).await.unwrap();

        say(&h.feed, &["only", "once"], 0).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(h.injector.texts().is_empty());

        h.handle.end_ptt().await.unwrap();
        assert_eq!(h.injector.texts(), vec!["only once"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dictation_before_ptt_press_is_kept() {
        let h = spawn(SessionConfig::default());
        h.handle.set_mode(Mode::On).await.unwrap();

        say(&h.feed, &["hello"], 0).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.handle.begin_ptt(Some(false)).await.unwrap();
        assert_eq!(h.injector.texts(), vec!["hello"]);

        say(&h.feed, &["world"], 500).await;
        settle().await;
        h.handle.end_ptt().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(h.injector.texts(), vec!["hello", " world"]);
        assert_eq!(h.handle.snapshot().turns.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ptt_in_sleep_with_buffered_chatter() {
        let h = spawn(SessionConfig::default());
        h.handle.set_mode(Mode::Sleep).await.unwrap();

        say(&h.feed, &["just", "chatting"], 0).await;
        settle().await;
        h.handle.begin_ptt(Some(false)).await.unwrap();
        assert!(h.handle.snapshot().in_progress.is_empty());

        say(&h.feed, &["note", "this"], 1000).await;
        settle().await;
        h.handle.end_ptt().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(h.injector.texts(), vec!["note this"]);
        assert_eq!(h.handle.snapshot().mode, Mode::Sleep);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_final_after_ptt_timeout_is_not_retyped() {
        let h = spawn(SessionConfig::default());
        h.handle.set_mode(Mode::On).await.unwrap();
        h.handle.begin_ptt(Some(false)).await.unwrap();

        say(&h.feed, &["hello"], 0).await;
        h.feed.push_word(TranscriptWord::interim("wor", 0.3, 300)).await;
        settle().await;
        h.handle.end_ptt().await.unwrap();
        assert!(h.handle.snapshot().ptt.is_processing);

        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert_eq!(h.injector.texts(), vec!["hello"]);

        // only the ambient stream is still open to hear this
        h.feed.push_word(TranscriptWord::final_word("world", 0.9, 300)).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.injector.texts(), vec!["hello"]);

        say(&h.feed, &["next"], 2000).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.injector.texts(), vec!["hello", " next"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_turns_are_spaced() {
        let mut config = SessionConfig::default();
        config.mode.format_turns = true;
        let h = spawn(config);
        h.handle.set_mode(Mode::On).await.unwrap();

        say(&h.feed, &["hello", "world"], 0).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        say(&h.feed, &["next", "thing"], 1000).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.injector.texts(), vec!["Hello world.", " Next thing."]);

        h.handle.set_mode(Mode::Off).await.unwrap();
        h.handle.set_mode(Mode::On).await.unwrap();
        say(&h.feed, &["fresh", "start"], 0).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.injector.texts().last().unwrap(), "Fresh start.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_assistant_behavior_submits_turns() {
        let h = spawn(SessionConfig::default());
        h.handle.set_behavior(ActiveBehavior::Assistant).await.unwrap();
        h.handle.set_mode(Mode::On).await.unwrap();

        say(&h.feed, &["what", "time", "is", "it"], 0).await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let snapshot = h.handle.snapshot();
        assert!(h.injector.texts().is_empty());
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[0].content, "what time is it");
        assert_eq!(snapshot.messages[1].content, "echo: what time is it");
        assert_eq!(snapshot.messages[1].status, MessageStatus::Complete);
        assert!(!snapshot.assistant_busy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_drains_in_order() {
        let h = spawn(SessionConfig::default());
        for text in ["a", "b", "c"] {
            h.handle.submit_command(text).await.unwrap();
        }
        settle().await;

        let contents: Vec<String> = h
            .handle
            .snapshot()
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(contents, vec!["a", "echo: a", "b", "echo: b", "c", "echo: c"]);
        assert!(h.handle.submit_command("  ").await.is_err());
        assert!(h.handle.snapshot().last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_sleep_then_auto_off() {
        let mut config = SessionConfig::default();
        config.mode.auto_sleep = Some(Duration::from_secs(60));
        config.mode.auto_off = Some(Duration::from_secs(300));
        let h = spawn(config);
        h.handle.set_mode(Mode::On).await.unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(h.handle.snapshot().mode, Mode::Sleep);
        assert!(!h.feed.open_streams().await.is_empty());

        tokio::time::sleep(Duration::from_secs(240)).await;
        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.mode, Mode::Off);
        assert!(!snapshot.listening);
        assert!(h.feed.open_streams().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loss_keeps_mode_until_reconnect() {
        let h = spawn(SessionConfig::default());
        h.handle.set_mode(Mode::On).await.unwrap();
        h.feed
            .push_word(TranscriptWord::final_word("unfinished", 0.3, 0))
            .await;
        h.feed.disconnect_all("recognizer exited").await;
        settle().await;

        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.mode, Mode::On);
        assert!(!snapshot.listening);
        assert!(matches!(snapshot.last_error, Some(SessionError::Connection { .. })));
        // the buffered word was finalized best-effort
        assert_eq!(h.injector.texts(), vec!["unfinished"]);

        h.handle.reconnect().await.unwrap();
        let snapshot = h.handle.snapshot();
        assert!(snapshot.listening);
        assert!(snapshot.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_stays_off_with_error() {
        let transport = Arc::new(FakeTransport::default());
        *transport.fail_with.lock().unwrap() =
            Some(TransportError::PermissionDenied("microphone blocked".into()));
        let (coordinator, handle) = SessionCoordinator::new(
            SessionConfig::default(),
            transport,
            Arc::new(RecordingInjector::default()),
            Arc::new(EchoBackend),
        );
        let (_hotkeys_tx, hotkeys_rx) = mpsc::channel(1);
        tokio::spawn(coordinator.run(hotkeys_rx));

        assert!(handle.set_mode(Mode::On).await.is_err());
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.mode, Mode::Off);
        assert!(!snapshot.listening);
        match snapshot.last_error {
            Some(SessionError::PermissionDenied { permission, .. }) => {
                assert_eq!(permission, Permission::Microphone)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_injection_failure_is_reported() {
        let h = spawn(SessionConfig::default());
        *h.injector.fail.lock().unwrap() = Some(InjectError::Failed("no focused app".into()));
        h.handle.begin_ptt(None).await.unwrap();
        say(&h.feed, &["lost"], 0).await;
        settle().await;
        h.handle.end_ptt().await.unwrap();

        assert!(matches!(
            h.handle.snapshot().last_error,
            Some(SessionError::Injection { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hotkeys_drive_mode_and_ptt() {
        let feed = Arc::new(IpcFeedTransport::new());
        let injector = Arc::new(RecordingInjector::default());
        let (coordinator, handle) = SessionCoordinator::new(
            SessionConfig::default(),
            feed.clone(),
            injector.clone(),
            Arc::new(EchoBackend),
        );
        let (hotkeys, hotkeys_rx) = mpsc::channel(8);
        tokio::spawn(coordinator.run(hotkeys_rx));

        hotkeys.send(HotkeySignal::ToggleSleep).await.unwrap();
        settle().await;
        assert_eq!(handle.snapshot().mode, Mode::Sleep);

        hotkeys.send(HotkeySignal::ToggleSleep).await.unwrap();
        settle().await;
        assert_eq!(handle.snapshot().mode, Mode::On);

        hotkeys.send(HotkeySignal::PttPressed).await.unwrap();
        settle().await;
        say(&feed, &["held"], 0).await;
        settle().await;
        hotkeys.send(HotkeySignal::PttReleased).await.unwrap();
        settle().await;
        assert_eq!(injector.texts(), vec!["held"]);

        hotkeys.send(HotkeySignal::ToggleOnOff).await.unwrap();
        settle().await;
        assert_eq!(handle.snapshot().mode, Mode::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_mode_and_shutdown() {
        let config = SessionConfig {
            start_mode: Mode::On,
            ..SessionConfig::default()
        };
        let h = spawn(config);
        settle().await;
        assert_eq!(h.handle.snapshot().mode, Mode::On);

        h.handle.shutdown().await.unwrap();
        settle().await;
        assert_eq!(h.handle.snapshot().mode, Mode::Off);
        assert!(h.feed.open_streams().await.is_empty());
        assert_eq!(h.handle.set_mode(Mode::On).await, Err(SessionError::Closed));
    }
}
