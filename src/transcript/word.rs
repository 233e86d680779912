//! Word events and finalized turns

use serde::{Deserialize, Serialize};

/// A single word event produced by the recognizer
///
/// `timestamp_ms` identifies the word within its stream: a later event with
/// the same timestamp revises it. It is therefore required on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptWord {
    pub text: String,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<u32>,
    /// Start of the word on the recognizer's clock, in milliseconds
    pub timestamp_ms: u64,
}

impl TranscriptWord {
    pub fn new(text: impl Into<String>, is_final: bool, confidence: f32, timestamp_ms: u64) -> Self {
        Self {
            text: text.into(),
            is_final,
            confidence,
            speaker_id: None,
            timestamp_ms,
        }
    }

    pub fn final_word(text: impl Into<String>, confidence: f32, timestamp_ms: u64) -> Self {
        Self::new(text, true, confidence, timestamp_ms)
    }

    pub fn interim(text: impl Into<String>, confidence: f32, timestamp_ms: u64) -> Self {
        Self::new(text, false, confidence, timestamp_ms)
    }

    pub fn with_speaker(mut self, speaker_id: u32) -> Self {
        self.speaker_id = Some(speaker_id);
        self
    }
}

/// How a turn came to be finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnEnd {
    /// Confident word followed by the profile's silence window
    Silence,
    /// User asked to end the utterance now
    Forced,
    /// Recognition stream dropped mid-utterance
    ConnectionLost,
}

/// A finalized utterance. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptTurn {
    words: Vec<TranscriptWord>,
    text: String,
    speaker: Option<u32>,
    end: TurnEnd,
    is_formatted: bool,
}

impl TranscriptTurn {
    /// Build a turn from buffered words. Returns `None` for an empty buffer.
    pub(crate) fn finalize(words: Vec<TranscriptWord>, end: TurnEnd, format: bool) -> Option<Self> {
        let raw = join_words(&words);
        if raw.is_empty() {
            return None;
        }

        let speaker = words.iter().find_map(|w| w.speaker_id);
        let text = if format { format_text(&raw) } else { raw };

        Some(Self {
            words,
            text,
            speaker,
            end,
            is_formatted: format,
        })
    }

    pub fn words(&self) -> &[TranscriptWord] {
        &self.words
    }

    /// Display text (formatted when `is_formatted` is set)
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Words joined with single spaces, never formatted
    pub fn raw_text(&self) -> String {
        join_words(&self.words)
    }

    pub fn speaker(&self) -> Option<u32> {
        self.speaker
    }

    pub fn end(&self) -> TurnEnd {
        self.end
    }

    /// True when the turn was closed by the endpointing policy
    pub fn end_of_turn(&self) -> bool {
        self.end == TurnEnd::Silence
    }

    pub fn is_formatted(&self) -> bool {
        self.is_formatted
    }
}

fn join_words(words: &[TranscriptWord]) -> String {
    words
        .iter()
        .map(|w| w.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Sentence-case the text and make sure it ends with punctuation
pub(crate) fn format_text(raw: &str) -> String {
    let mut chars = raw.chars();
    let mut out = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => return String::new(),
    };
    if !out.ends_with(['.', '?', '!']) {
        out.push('.');
    }
    out
}
