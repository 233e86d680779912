//! Keystroke injection using Quartz keyboard events
//!
//! Text is attached to synthetic key events as a unicode string. macOS only
//! honors a short string per event, so longer text is posted in chunks.

use async_trait::async_trait;
use core_graphics::event::{CGEvent, CGEventTapLocation};
use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};
use tracing::{debug, warn};

use crate::error::InjectError;

use super::TextInjector;

/// UTF-16 units macOS accepts per keyboard event
const CHUNK_UNITS: usize = 20;

#[derive(Debug, Default, Clone, Copy)]
pub struct KeystrokeInjector;

impl KeystrokeInjector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextInjector for KeystrokeInjector {
    async fn inject(&self, text: &str) -> Result<(), InjectError> {
        let text = text.to_string();
        tokio::task::spawn_blocking(move || post_text(&text))
            .await
            .map_err(|e| InjectError::Failed(format!("injection task failed: {e}")))?
    }
}

fn post_text(text: &str) -> Result<(), InjectError> {
    let chunks = chunk_utf16(text, CHUNK_UNITS);
    debug!(chunks = chunks.len(), "posting keystrokes");

    for chunk in chunks {
        // A fresh source per event; CGEventSource is not Send
        let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState).map_err(|_| {
            InjectError::PermissionDenied("cannot create keyboard event source".into())
        })?;

        for key_down in [true, false] {
            let event = CGEvent::new_keyboard_event(source.clone(), 0, key_down).map_err(|_| {
                warn!("failed to create keyboard event, is Accessibility permission granted?");
                InjectError::PermissionDenied("cannot create keyboard event".into())
            })?;
            event.set_string(&chunk);
            event.post(CGEventTapLocation::HID);
        }
    }
    Ok(())
}

/// Split text on char boundaries into pieces of at most `max_units` UTF-16 units
fn chunk_utf16(text: &str, max_units: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut units = 0;
    for ch in text.chars() {
        let len = ch.len_utf16();
        if units + len > max_units && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            units = 0;
        }
        current.push(ch);
        units += len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
