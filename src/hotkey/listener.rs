//! Global hotkey listener
//!
//! On macOS a CGEventTap on a dedicated thread watches modifier changes and
//! feeds them through a [`ShortcutDecoder`]. Other platforms have no global
//! tap; shortcuts are then only reachable over IPC.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::keys::HotkeySignal;

/// Errors that can occur in the hotkey listener
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("hotkey listener is already running")]
    AlreadyRunning,

    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error("global hotkeys are not supported on this platform")]
    Unsupported,
}

/// Global hotkey listener that decodes modifier chords into signals
pub struct HotkeyListener {
    #[cfg_attr(not(target_os = "macos"), allow(dead_code))]
    signal_tx: mpsc::Sender<HotkeySignal>,
    running: Arc<AtomicBool>,
}

impl HotkeyListener {
    pub fn new(signal_tx: mpsc::Sender<HotkeySignal>) -> Self {
        Self {
            signal_tx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the listener thread. It runs until `stop()` is called.
    #[cfg(target_os = "macos")]
    pub fn start(&self) -> Result<(), HotkeyError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HotkeyError::AlreadyRunning);
        }

        let signal_tx = self.signal_tx.clone();
        let running = Arc::clone(&self.running);

        std::thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                tracing::info!("hotkey listener thread started");
                if let Err(e) = tap::run_event_loop(signal_tx, running.clone()) {
                    tracing::error!(?e, "hotkey listener error");
                }
                running.store(false, Ordering::SeqCst);
                tracing::info!("hotkey listener thread stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                HotkeyError::ThreadSpawn(e.to_string())
            })?;

        Ok(())
    }

    #[cfg(not(target_os = "macos"))]
    pub fn start(&self) -> Result<(), HotkeyError> {
        Err(HotkeyError::Unsupported)
    }

    /// Ask the listener thread to exit; it checks the flag every 100ms
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(target_os = "macos")]
mod tap {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
    use core_graphics::event::{
        CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
        CGEventTapPlacement, CGEventTapProxy, CGEventType,
    };
    use tokio::sync::mpsc;
    use tracing::{debug, error, info, warn};

    use super::super::keys::{HotkeySignal, ModifierState, ShortcutDecoder};
    use super::HotkeyError;

    pub(super) fn run_event_loop(
        signal_tx: mpsc::Sender<HotkeySignal>,
        running: Arc<AtomicBool>,
    ) -> Result<(), HotkeyError> {
        let mut decoder = ShortcutDecoder::new();
        let (callback_tx, callback_rx) = std::sync::mpsc::channel::<CGEventFlags>();

        // Runs inside the tap; must not block
        let callback = move |_proxy: CGEventTapProxy,
                             event_type: CGEventType,
                             event: &CGEvent|
              -> Option<CGEvent> {
            match event_type {
                CGEventType::FlagsChanged => {
                    let _ = callback_tx.send(event.get_flags());
                }
                CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                    warn!("event tap disabled by the system");
                }
                _ => {}
            }
            Some(event.clone())
        };

        let tap = CGEventTap::new(
            CGEventTapLocation::Session,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::ListenOnly,
            vec![CGEventType::FlagsChanged],
            callback,
        )
        .map_err(|_| {
            error!("failed to create event tap - is Accessibility permission granted?");
            HotkeyError::EventTapCreation
        })?;

        tap.enable();

        let source = tap
            .mach_port
            .create_runloop_source(0)
            .map_err(|_| HotkeyError::EventTapCreation)?;
        let run_loop = CFRunLoop::get_current();
        unsafe {
            run_loop.add_source(&source, kCFRunLoopCommonModes);
        }
        info!("event tap created and enabled");

        while running.load(Ordering::SeqCst) {
            unsafe {
                CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, Duration::from_millis(100), true);
            }

            while let Ok(flags) = callback_rx.try_recv() {
                let state = ModifierState::from_flags(flags);
                for signal in decoder.update(state) {
                    debug!(?signal, "shortcut");
                    if signal_tx.blocking_send(signal).is_err() {
                        warn!("hotkey receiver closed, stopping listener");
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_creation() {
        let (tx, _rx) = mpsc::channel(32);
        let listener = HotkeyListener::new(tx);
        assert!(!listener.is_running());
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_unsupported_platform() {
        let (tx, _rx) = mpsc::channel(1);
        let listener = HotkeyListener::new(tx);
        assert!(matches!(listener.start(), Err(HotkeyError::Unsupported)));
        assert!(!listener.is_running());
    }
}
