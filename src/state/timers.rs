//! Inactivity timers
//!
//! Two independent countdowns driven by the absence of recognized words.
//! Each is just a deadline: cancelling means clearing it, and the
//! coordinator sleeps until the nearest one. An expired deadline is handed
//! back to the mode controller, which re-checks the current mode before
//! acting on it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::machine::Mode;

/// Which countdown expired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// On -> Sleep
    AutoSleep,
    /// On/Sleep -> Off
    AutoOff,
}

#[derive(Debug, Clone, Copy)]
struct Countdown {
    /// `None` when the feature is disabled
    duration: Option<Duration>,
    deadline: Option<Instant>,
}

impl Countdown {
    fn new(duration: Option<Duration>) -> Self {
        Self {
            duration,
            deadline: None,
        }
    }

    fn arm(&mut self, now: Instant) {
        self.deadline = self.duration.map(|d| now + d);
    }

    fn cancel(&mut self) {
        self.deadline = None;
    }

    fn take_if_expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Auto-sleep and auto-off countdowns
#[derive(Debug, Clone)]
pub struct InactivityTimers {
    auto_sleep: Countdown,
    auto_off: Countdown,
}

impl InactivityTimers {
    /// Pass `None` to disable a timer
    pub fn new(auto_sleep: Option<Duration>, auto_off: Option<Duration>) -> Self {
        Self {
            auto_sleep: Countdown::new(auto_sleep),
            auto_off: Countdown::new(auto_off),
        }
    }

    /// Adjust timers for a mode the controller just entered.
    ///
    /// Auto-off measures inactivity across On and Sleep combined, so moving
    /// between them keeps its running deadline.
    pub fn enter(&mut self, mode: Mode, now: Instant) {
        match mode {
            Mode::Off => self.cancel_all(),
            Mode::On => {
                self.auto_sleep.arm(now);
                if self.auto_off.deadline.is_none() {
                    self.auto_off.arm(now);
                }
            }
            Mode::Sleep => {
                self.auto_sleep.cancel();
                if self.auto_off.deadline.is_none() {
                    self.auto_off.arm(now);
                }
            }
        }
    }

    /// A word was recognized while in `mode`
    pub fn record_activity(&mut self, mode: Mode, now: Instant) {
        match mode {
            Mode::Off => {}
            Mode::On => {
                self.auto_sleep.arm(now);
                self.auto_off.arm(now);
            }
            Mode::Sleep => self.auto_off.arm(now),
        }
    }

    pub fn cancel_all(&mut self) {
        self.auto_sleep.cancel();
        self.auto_off.cancel();
    }

    /// Remove and return one expired timer, auto-off first
    pub fn take_expired(&mut self, now: Instant) -> Option<TimerKind> {
        if self.auto_off.take_if_expired(now) {
            return Some(TimerKind::AutoOff);
        }
        if self.auto_sleep.take_if_expired(now) {
            return Some(TimerKind::AutoSleep);
        }
        None
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.auto_sleep.deadline, self.auto_off.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        match kind {
            TimerKind::AutoSleep => self.auto_sleep.deadline,
            TimerKind::AutoOff => self.auto_off.deadline,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.next_deadline().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: Duration = Duration::from_secs(60);

    #[test]
    fn test_on_arms_both() {
        let now = Instant::now();
        let mut timers = InactivityTimers::new(Some(5 * MIN), Some(30 * MIN));
        timers.enter(Mode::On, now);
        assert_eq!(timers.deadline(TimerKind::AutoSleep), Some(now + 5 * MIN));
        assert_eq!(timers.deadline(TimerKind::AutoOff), Some(now + 30 * MIN));
        assert_eq!(timers.next_deadline(), Some(now + 5 * MIN));
    }

    #[test]
    fn test_activity_resets_countdowns() {
        let now = Instant::now();
        let mut timers = InactivityTimers::new(Some(5 * MIN), Some(30 * MIN));
        timers.enter(Mode::On, now);
        timers.record_activity(Mode::On, now + 4 * MIN);
        assert_eq!(timers.take_expired(now + 5 * MIN), None);
        assert_eq!(timers.deadline(TimerKind::AutoSleep), Some(now + 9 * MIN));
    }

    #[test]
    fn test_sleep_keeps_auto_off_deadline() {
        let now = Instant::now();
        let mut timers = InactivityTimers::new(None, Some(30 * MIN));
        timers.enter(Mode::On, now);
        timers.enter(Mode::Sleep, now + 20 * MIN);
        assert_eq!(timers.deadline(TimerKind::AutoSleep), None);
        assert_eq!(timers.deadline(TimerKind::AutoOff), Some(now + 30 * MIN));
        assert_eq!(timers.take_expired(now + 30 * MIN), Some(TimerKind::AutoOff));
        assert!(timers.is_idle());
    }

    #[test]
    fn test_disabled_timers_never_arm() {
        let now = Instant::now();
        let mut timers = InactivityTimers::new(None, None);
        timers.enter(Mode::On, now);
        timers.record_activity(Mode::On, now);
        assert!(timers.is_idle());
    }

    #[test]
    fn test_off_cancels_everything() {
        let now = Instant::now();
        let mut timers = InactivityTimers::new(Some(MIN), Some(2 * MIN));
        timers.enter(Mode::Sleep, now);
        assert!(timers.deadline(TimerKind::AutoOff).is_some());
        timers.enter(Mode::Off, now);
        assert!(timers.is_idle());
        timers.record_activity(Mode::Off, now);
        assert!(timers.is_idle());
    }

    #[test]
    fn test_expiry_is_taken_once() {
        let now = Instant::now();
        let mut timers = InactivityTimers::new(Some(MIN), None);
        timers.enter(Mode::On, now);
        assert_eq!(timers.take_expired(now + 2 * MIN), Some(TimerKind::AutoSleep));
        assert_eq!(timers.take_expired(now + 3 * MIN), None);
    }
}
