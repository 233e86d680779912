//! Session coordination
//!
//! The coordinator task is the single writer for all session state. The
//! rest of the daemon talks to it through a [`SessionHandle`].

mod coordinator;
mod handle;
mod snapshot;

pub use coordinator::{SessionConfig, SessionCoordinator};
pub use handle::{SessionCommand, SessionHandle};
pub use snapshot::{SessionSnapshot, TimerStatus};
