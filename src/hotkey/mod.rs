//! Hotkey module for global keyboard shortcuts
//!
//! Modifier chords drive push-to-talk and mode shortcuts. The decoder is
//! platform independent; the event tap is macOS only.

mod keys;
mod listener;

pub use keys::{HotkeySignal, ModifierState, ShortcutDecoder};
pub use listener::{HotkeyError, HotkeyListener};
