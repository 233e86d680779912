//! Push-to-talk module
//!
//! Momentary (hold) or sticky (toggle) capture that overlays the ambient
//! mode without changing it. Uses its own recognition subscription so mode
//! transitions and inactivity timers never touch the capture buffer.

mod session;

pub use session::{PttOutcome, PttState, PushToTalkSession};
