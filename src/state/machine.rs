//! Mode controller
//!
//! Owns the Off/On/Sleep mode, the ambient recognition stream, its
//! utterance segmenter and the inactivity timers. Every mode change, be it
//! explicit, shortcut, spoken keyword or timer expiry, goes through
//! [`ModeController::transition`] so the side effects are identical.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::recognizer::{
    self, ConnectionState, RecognitionTransport, StreamKind, StreamSink, TransportEvent,
};
use crate::transcript::{
    format_text, ProfileName, TranscriptTurn, TranscriptWord, UtteranceProfile, UtteranceSegmenter,
};

use super::phrases::PhraseSet;
use super::timers::{InactivityTimers, TimerKind};

/// Top-level dictation mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// No recognition stream, no timers
    #[default]
    Off,
    /// Dictating: finalized turns are routed to injection or the assistant
    On,
    /// Stream open, turns only checked for wake phrases
    Sleep,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Off => write!(f, "Off"),
            Mode::On => write!(f, "On"),
            Mode::Sleep => write!(f, "Sleep"),
        }
    }
}

/// How finalized turns are handled while On
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveBehavior {
    /// Type every turn into the focused application
    #[default]
    Dictation,
    /// Hands-free: send every turn to the assistant command queue
    Assistant,
}

/// What triggered a mode change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    Explicit,
    Shortcut,
    Startup,
    Keyword,
    AutoSleep,
    AutoOff,
    ConnectionFailed,
    Shutdown,
}

/// A completed mode change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeChange {
    pub from: Mode,
    pub to: Mode,
    pub cause: TransitionCause,
    /// Time spent in `from`
    pub duration_ms: u64,
}

/// What to do with a finalized ambient turn
#[derive(Debug, Clone, PartialEq)]
pub enum TurnAction {
    ModeChanged(ModeChange),
    Inject(String),
    Submit(String),
}

/// A failed manual reconnect. When the retry itself failed the controller
/// has already reverted to Off and `change` records that transition.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectFailure {
    pub error: SessionError,
    pub change: Option<ModeChange>,
}

/// Static settings for the controller
#[derive(Debug, Clone)]
pub struct ModeSettings {
    pub profile: ProfileName,
    pub custom_profile: UtteranceProfile,
    pub behavior: ActiveBehavior,
    pub format_turns: bool,
    pub wake_phrases: Vec<String>,
    pub sleep_phrases: Vec<String>,
    pub auto_sleep: Option<Duration>,
    pub auto_off: Option<Duration>,
    pub connect_timeout: Duration,
}

impl Default for ModeSettings {
    fn default() -> Self {
        Self {
            profile: ProfileName::default(),
            custom_profile: UtteranceProfile::default(),
            behavior: ActiveBehavior::default(),
            format_turns: false,
            wake_phrases: vec!["microphone on".into()],
            sleep_phrases: vec!["microphone off".into()],
            auto_sleep: None,
            auto_off: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// The Off/On/Sleep state machine
pub struct ModeController {
    mode: Mode,
    behavior: ActiveBehavior,
    connection: ConnectionState,
    /// Bumped on every open and close so late events can be recognized
    generation: u64,
    /// Ambient words at or before this recognizer timestamp were already
    /// delivered by push-to-talk
    fence_ms: Option<u64>,
    mode_entered_at: Option<Instant>,
    profile_name: ProfileName,
    custom_profile: UtteranceProfile,
    segmenter: UtteranceSegmenter,
    timers: InactivityTimers,
    phrases: PhraseSet,
    connect_timeout: Duration,
    transport: Arc<dyn RecognitionTransport>,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl ModeController {
    pub fn new(
        settings: ModeSettings,
        transport: Arc<dyn RecognitionTransport>,
        events_tx: mpsc::Sender<TransportEvent>,
    ) -> Self {
        let profile = UtteranceProfile::resolve(settings.profile, &settings.custom_profile);
        Self {
            mode: Mode::Off,
            behavior: settings.behavior,
            connection: ConnectionState::idle(),
            generation: 0,
            fence_ms: None,
            mode_entered_at: None,
            profile_name: settings.profile,
            custom_profile: settings.custom_profile,
            segmenter: UtteranceSegmenter::new(profile, settings.format_turns),
            timers: InactivityTimers::new(settings.auto_sleep, settings.auto_off),
            phrases: PhraseSet::new(
                settings.wake_phrases.as_slice(),
                settings.sleep_phrases.as_slice(),
            ),
            connect_timeout: settings.connect_timeout,
            transport,
            events_tx,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn behavior(&self) -> ActiveBehavior {
        self.behavior
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    /// Stream open and delivering words
    pub fn is_listening(&self) -> bool {
        self.mode != Mode::Off && self.connection.is_connected()
    }

    pub fn profile(&self) -> &UtteranceProfile {
        self.segmenter.profile()
    }

    pub fn in_progress(&self) -> Vec<TranscriptWord> {
        self.segmenter.in_progress()
    }

    pub fn timer_deadline(&self, kind: TimerKind) -> Option<Instant> {
        self.timers.deadline(kind)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.segmenter.deadline(), self.timers.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn set_behavior(&mut self, behavior: ActiveBehavior) {
        if behavior != self.behavior {
            info!(from = ?self.behavior, to = ?behavior, "active behavior changed");
            self.behavior = behavior;
        }
    }

    /// Switch the active profile; applies from the next word
    pub fn set_profile(&mut self, name: ProfileName) {
        self.profile_name = name;
        let profile = UtteranceProfile::resolve(name, &self.custom_profile);
        info!(
            profile = %name,
            confidence = profile.confidence_threshold,
            silence_ms = profile.silence_threshold_ms,
            "utterance profile changed"
        );
        self.segmenter.set_profile(profile);
    }

    /// Edit the custom profile and make it active
    pub fn set_custom_profile(&mut self, confidence_threshold: f32, silence_threshold_ms: u64) {
        self.custom_profile = UtteranceProfile::custom(confidence_threshold, silence_threshold_ms);
        self.set_profile(ProfileName::Custom);
    }

    pub fn profile_name(&self) -> ProfileName {
        self.profile_name
    }

    /// Requested mode change from the user, a shortcut or startup config.
    ///
    /// Leaving Off opens the ambient stream first; if that fails the
    /// controller stays Off and the error is returned.
    pub async fn set_mode(
        &mut self,
        target: Mode,
        cause: TransitionCause,
        now: Instant,
    ) -> Result<Option<ModeChange>, SessionError> {
        if target == self.mode {
            debug!(mode = %target, "mode unchanged");
            return Ok(None);
        }

        if self.mode == Mode::Off {
            self.open_stream().await?;
        }

        Ok(self.transition(target, cause, now).await)
    }

    /// Manual retry after the stream dropped
    pub async fn reconnect(&mut self, now: Instant) -> Result<(), ReconnectFailure> {
        if self.mode == Mode::Off {
            return Err(ReconnectFailure {
                error: SessionError::InvalidCommand {
                    reason: "nothing to reconnect while the microphone is off".into(),
                },
                change: None,
            });
        }
        if self.connection.is_connected() {
            return Ok(());
        }

        match self.open_stream().await {
            Ok(()) => Ok(()),
            Err(error) => {
                let change = self
                    .transition(Mode::Off, TransitionCause::ConnectionFailed, now)
                    .await;
                self.connection = ConnectionState::Disconnected {
                    reason: Some(error.to_string()),
                };
                warn!(%error, "reconnect failed, microphone turned off");
                Err(ReconnectFailure { error, change })
            }
        }
    }

    async fn open_stream(&mut self) -> Result<(), SessionError> {
        self.generation += 1;
        let sink = StreamSink::new(StreamKind::Ambient, self.generation, self.events_tx.clone());
        self.connection = ConnectionState::Connecting;
        self.fence_ms = None;

        match recognizer::open_stream(&*self.transport, sink, self.connect_timeout).await {
            Ok(()) => {
                info!(generation = self.generation, "recognition stream opened");
                self.connection = ConnectionState::Connected;
                Ok(())
            }
            Err(err) => {
                // Invalidate anything the half-open stream may still send
                self.generation += 1;
                self.connection = ConnectionState::Disconnected {
                    reason: Some(err.to_string()),
                };
                Err(err.into())
            }
        }
    }

    /// The single transition path shared by every trigger
    async fn transition(
        &mut self,
        target: Mode,
        cause: TransitionCause,
        now: Instant,
    ) -> Option<ModeChange> {
        let from = self.mode;
        if from == target {
            return None;
        }

        let duration_ms = self
            .mode_entered_at
            .map(|t| now.saturating_duration_since(t).as_millis() as u64)
            .unwrap_or(0);

        match target {
            Mode::Off => {
                self.transport.close(StreamKind::Ambient).await;
                self.generation += 1;
                self.connection = ConnectionState::idle();
                self.fence_ms = None;
                self.segmenter.reset();
            }
            Mode::On | Mode::Sleep => {
                // Words spoken under the previous mode are not carried over
                self.segmenter.reset();
            }
        }
        self.timers.enter(target, now);

        self.mode = target;
        self.mode_entered_at = (target != Mode::Off).then_some(now);

        info!(
            from = %from,
            to = %target,
            ?cause,
            duration_ms,
            "mode transition"
        );

        Some(ModeChange {
            from,
            to: target,
            cause,
            duration_ms,
        })
    }

    /// Whether an ambient transport event belongs to the current stream
    fn accepts(&self, generation: u64) -> bool {
        if self.mode == Mode::Off {
            warn!(generation, "ignoring recognition event while microphone is off");
            return false;
        }
        if generation != self.generation {
            warn!(
                generation,
                current = self.generation,
                "ignoring event from a closed recognition stream"
            );
            return false;
        }
        true
    }

    /// A word arrived on the ambient stream
    pub fn on_word(&mut self, generation: u64, word: TranscriptWord, now: Instant) -> bool {
        if !self.accepts(generation) {
            return false;
        }
        if matches!(self.fence_ms, Some(fence) if word.timestamp_ms <= fence) {
            debug!(
                text = %word.text,
                timestamp_ms = word.timestamp_ms,
                "ambient word already captured by push-to-talk"
            );
            return false;
        }
        debug!(
            text = %word.text,
            is_final = word.is_final,
            confidence = word.confidence,
            "word"
        );
        self.timers.record_activity(self.mode, now);
        self.segmenter.ingest(word, now);
        true
    }

    /// The ambient stream dropped. Mode is kept; the buffered utterance is
    /// finalized best-effort and returned.
    pub fn on_disconnected(&mut self, generation: u64, reason: String) -> Option<TranscriptTurn> {
        if !self.accepts(generation) {
            return None;
        }
        warn!(%reason, mode = %self.mode, "recognition stream lost");
        self.generation += 1;
        self.connection = ConnectionState::Disconnected {
            reason: Some(reason),
        };
        self.segmenter.connection_lost()
    }

    /// User asked to end the current utterance now
    pub fn force_end(&mut self) -> Option<TranscriptTurn> {
        if self.mode == Mode::Off {
            return None;
        }
        self.segmenter.force_end()
    }

    /// Hand speech up to `through_ms` over to push-to-talk: buffered
    /// ambient words are dropped and later ambient events for that span are
    /// ignored
    pub fn yield_to_capture(&mut self, through_ms: Option<u64>) {
        if !self.segmenter.is_empty() {
            debug!("discarding in-progress ambient words");
            self.segmenter.reset();
        }
        if let Some(ts) = through_ms {
            let fence = self.fence_ms.map_or(ts, |f| f.max(ts));
            self.fence_ms = Some(fence);
        }
    }

    /// Finalize the utterance if its silence window has elapsed
    pub fn poll_turn(&mut self, now: Instant) -> Option<TranscriptTurn> {
        self.segmenter.poll(now)
    }

    /// Act on every expired inactivity timer
    pub async fn poll_timers(&mut self, now: Instant) -> Vec<ModeChange> {
        let mut changes = Vec::new();
        while let Some(kind) = self.timers.take_expired(now) {
            let change = match (kind, self.mode) {
                (TimerKind::AutoSleep, Mode::On) => {
                    self.transition(Mode::Sleep, TransitionCause::AutoSleep, now).await
                }
                (TimerKind::AutoOff, Mode::On | Mode::Sleep) => {
                    self.transition(Mode::Off, TransitionCause::AutoOff, now).await
                }
                (kind, mode) => {
                    warn!(?kind, %mode, "inactivity timer fired after mode changed, ignoring");
                    None
                }
            };
            changes.extend(change);
        }
        changes
    }

    /// Decide what a finalized ambient turn means in the current mode.
    ///
    /// `suppress_output` is set while a push-to-talk capture owns the
    /// speech; keyword detection still runs but nothing is injected.
    pub async fn route_turn(
        &mut self,
        turn: &TranscriptTurn,
        suppress_output: bool,
        now: Instant,
    ) -> Vec<TurnAction> {
        let mut actions = Vec::new();
        match self.mode {
            Mode::Off => {
                warn!("dropping turn finalized while microphone is off");
            }
            Mode::Sleep => {
                let Some(wake) = self.phrases.match_wake(turn.text()) else {
                    debug!("turn ignored while asleep");
                    return actions;
                };
                info!(phrase = %wake.phrase, "wake phrase detected");
                actions.extend(
                    self.transition(Mode::On, TransitionCause::Keyword, now)
                        .await
                        .map(TurnAction::ModeChanged),
                );
                if let Some(remainder) = wake.remainder {
                    let text = if turn.is_formatted() {
                        format_text(&remainder)
                    } else {
                        remainder
                    };
                    actions.extend(self.output_action(text, suppress_output));
                }
            }
            Mode::On => {
                if let Some(sleep) = self.phrases.match_sleep(turn.text()) {
                    info!(phrase = %sleep.phrase, "sleep phrase detected");
                    actions.extend(
                        self.transition(Mode::Sleep, TransitionCause::Keyword, now)
                            .await
                            .map(TurnAction::ModeChanged),
                    );
                } else {
                    actions.extend(self.output_action(turn.text().to_string(), suppress_output));
                }
            }
        }
        actions
    }

    fn output_action(&self, text: String, suppress_output: bool) -> Option<TurnAction> {
        if suppress_output {
            debug!("push-to-talk active, ambient turn not delivered");
            return None;
        }
        Some(match self.behavior {
            ActiveBehavior::Dictation => TurnAction::Inject(text),
            ActiveBehavior::Assistant => TurnAction::Submit(text),
        })
    }
}
