//! State machine module for mode management
//!
//! Provides the explicit Off/On/Sleep state machine:
//! - Off: no recognition stream, no timers
//! - On: dictating, turns are injected or sent to the assistant
//! - Sleep: stream open, turns only matched against wake phrases
//!
//! Inactivity timers and wake/sleep phrase matching live here too since
//! the mode controller is their only owner.

mod machine;
mod phrases;
mod timers;

pub use machine::{
    ActiveBehavior, Mode, ModeChange, ModeController, ModeSettings, ReconnectFailure, TransitionCause,
    TurnAction,
};
pub use phrases::{PhraseMatch, PhraseSet};
pub use timers::{InactivityTimers, TimerKind};

#[cfg(test)]
pub(crate) use machine::tests::FakeTransport;
