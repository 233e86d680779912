//! Modifier key state and shortcut decoding
//!
//! Shortcuts are chords of modifier keys only. The decoder turns a stream
//! of modifier-state changes into discrete [`HotkeySignal`]s:
//!
//! - Control+Option held: push-to-talk press, released on chord break
//! - Control+Command: toggle microphone Off/On
//! - Option+Command: toggle On/Sleep
//! - Control+Shift: force end of the current utterance
//!
//! Toggles fire on the rising edge only, so holding a chord never repeats.

/// Modifier key flag masks from macOS CGEventFlags
#[cfg(target_os = "macos")]
pub mod flags {
    use core_graphics::event::CGEventFlags;

    pub const CONTROL: CGEventFlags = CGEventFlags::CGEventFlagControl;
    pub const OPTION: CGEventFlags = CGEventFlags::CGEventFlagAlternate;
    pub const COMMAND: CGEventFlags = CGEventFlags::CGEventFlagCommand;
    pub const SHIFT: CGEventFlags = CGEventFlags::CGEventFlagShift;
}

/// Tracks which modifier keys are currently pressed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    pub control: bool,
    pub option: bool,
    pub command: bool,
    pub shift: bool,
}

/// A decoded shortcut, carrying nothing beyond its identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeySignal {
    PttPressed,
    PttReleased,
    ToggleOnOff,
    ToggleSleep,
    ForceEnd,
}

impl ModifierState {
    #[cfg(target_os = "macos")]
    pub fn from_flags(value: core_graphics::event::CGEventFlags) -> Self {
        Self {
            control: value.contains(flags::CONTROL),
            option: value.contains(flags::OPTION),
            command: value.contains(flags::COMMAND),
            shift: value.contains(flags::SHIFT),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.control && !self.option && !self.command && !self.shift
    }

    /// Push-to-talk chord
    pub fn is_control_option(&self) -> bool {
        self.control && self.option && !self.command && !self.shift
    }

    /// Microphone on/off chord
    pub fn is_control_command(&self) -> bool {
        self.control && self.command && !self.option && !self.shift
    }

    /// Sleep toggle chord
    pub fn is_option_command(&self) -> bool {
        self.option && self.command && !self.control && !self.shift
    }

    /// Force-end chord
    pub fn is_control_shift(&self) -> bool {
        self.control && self.shift && !self.option && !self.command
    }
}

/// Edge detector from modifier states to shortcut signals
#[derive(Debug, Default)]
pub struct ShortcutDecoder {
    last: ModifierState,
    ptt_held: bool,
}

impl ShortcutDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, state: ModifierState) -> Vec<HotkeySignal> {
        let previous = std::mem::replace(&mut self.last, state);
        let mut signals = Vec::new();

        let ptt_chord = state.is_control_option();
        if ptt_chord && !self.ptt_held {
            self.ptt_held = true;
            signals.push(HotkeySignal::PttPressed);
        } else if !ptt_chord && self.ptt_held {
            self.ptt_held = false;
            signals.push(HotkeySignal::PttReleased);
        }

        if state.is_control_command() && !previous.is_control_command() {
            signals.push(HotkeySignal::ToggleOnOff);
        }
        if state.is_option_command() && !previous.is_option_command() {
            signals.push(HotkeySignal::ToggleSleep);
        }
        if state.is_control_shift() && !previous.is_control_shift() {
            signals.push(HotkeySignal::ForceEnd);
        }
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(control: bool, option: bool, command: bool, shift: bool) -> ModifierState {
        ModifierState {
            control,
            option,
            command,
            shift,
        }
    }

    #[test]
    fn test_empty_state() {
        let state = ModifierState::default();
        assert!(state.is_empty());
        assert!(!state.is_control_option());
    }

    #[test]
    fn test_chords_are_exclusive() {
        let state = keys(true, true, true, false);
        assert!(!state.is_control_option());
        assert!(!state.is_control_command());
        assert!(!state.is_option_command());
    }

    #[test]
    fn test_ptt_press_and_release() {
        let mut decoder = ShortcutDecoder::new();
        assert!(decoder.update(keys(true, false, false, false)).is_empty());
        assert_eq!(
            decoder.update(keys(true, true, false, false)),
            vec![HotkeySignal::PttPressed]
        );
        // releasing one key of the chord ends the capture
        assert_eq!(
            decoder.update(keys(true, false, false, false)),
            vec![HotkeySignal::PttReleased]
        );
        assert!(decoder.update(ModifierState::default()).is_empty());
    }

    #[test]
    fn test_toggle_fires_on_rising_edge_only() {
        let mut decoder = ShortcutDecoder::new();
        let chord = keys(true, false, true, false);
        assert_eq!(decoder.update(chord), vec![HotkeySignal::ToggleOnOff]);
        assert!(decoder.update(chord).is_empty());
        decoder.update(ModifierState::default());
        assert_eq!(decoder.update(chord), vec![HotkeySignal::ToggleOnOff]);
    }

    #[test]
    fn test_sleep_toggle_and_force_end() {
        let mut decoder = ShortcutDecoder::new();
        assert_eq!(
            decoder.update(keys(false, true, true, false)),
            vec![HotkeySignal::ToggleSleep]
        );
        decoder.update(ModifierState::default());
        assert_eq!(
            decoder.update(keys(true, false, false, true)),
            vec![HotkeySignal::ForceEnd]
        );
    }

    #[test]
    fn test_ptt_chord_growing_into_toggle() {
        let mut decoder = ShortcutDecoder::new();
        decoder.update(keys(true, true, false, false));
        // adding Command breaks the PTT chord without forming another
        assert_eq!(
            decoder.update(keys(true, true, true, false)),
            vec![HotkeySignal::PttReleased]
        );
    }
}
