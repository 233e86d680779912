//! dictation-daemon: voice dictation session controller
//!
//! Decides when an utterance is over, which mode the microphone is in
//! (Off, On, Sleep), when inactivity should put it to sleep or turn it off,
//! how push-to-talk overlays the ambient mode, and how spoken or typed
//! commands are queued for a streaming assistant backend.
//!
//! Speech recognition, keystroke injection and the assistant itself are
//! collaborators behind traits; the daemon binary wires in an IPC-fed
//! recognizer, a platform injector and a command-line assistant backend.

pub mod assistant;
pub mod config;
pub mod error;
pub mod events;
pub mod hotkey;
pub mod inject;
pub mod ipc;
pub mod lifecycle;
pub mod ptt;
pub mod recognizer;
pub mod session;
pub mod state;
pub mod transcript;
