//! Text injection into the focused application
//!
//! The coordinator calls [`TextInjector::inject`] once per finalized
//! dictation turn and once per push-to-talk flush.

#[cfg(target_os = "macos")]
mod keystroke;

use async_trait::async_trait;
use tracing::debug;

use crate::error::InjectError;

#[cfg(target_os = "macos")]
pub use keystroke::KeystrokeInjector;

#[async_trait]
pub trait TextInjector: Send + Sync {
    async fn inject(&self, text: &str) -> Result<(), InjectError>;
}

/// Leaves typing to IPC subscribers, which receive every injected text as a
/// `text_injected` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeferredInjector;

#[async_trait]
impl TextInjector for DeferredInjector {
    async fn inject(&self, text: &str) -> Result<(), InjectError> {
        debug!(chars = text.len(), "injection deferred to subscribers");
        Ok(())
    }
}

/// Injector for the current platform
pub fn platform_injector() -> std::sync::Arc<dyn TextInjector> {
    #[cfg(target_os = "macos")]
    {
        std::sync::Arc::new(KeystrokeInjector::new())
    }
    #[cfg(not(target_os = "macos"))]
    {
        std::sync::Arc::new(DeferredInjector)
    }
}
