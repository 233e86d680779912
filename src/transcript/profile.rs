//! Endpointing profiles
//!
//! A profile trades latency for fewer false splits: a low confidence
//! threshold and short silence window finalize eagerly, a high threshold
//! and long window wait for near-certainty.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::word::TranscriptWord;

/// Named profile presets plus the user-editable custom slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileName {
    Quick,
    #[default]
    Balanced,
    Patient,
    Dictation,
    ExtraLong,
    Custom,
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProfileName::Quick => "quick",
            ProfileName::Balanced => "balanced",
            ProfileName::Patient => "patient",
            ProfileName::Dictation => "dictation",
            ProfileName::ExtraLong => "extra_long",
            ProfileName::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Confidence + silence parameters for deciding an utterance is over
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtteranceProfile {
    pub name: ProfileName,
    /// In [0, 1]
    pub confidence_threshold: f32,
    pub silence_threshold_ms: u64,
}

impl UtteranceProfile {
    /// Built-in preset for `name`; `None` for [`ProfileName::Custom`]
    pub fn preset(name: ProfileName) -> Option<Self> {
        let (confidence_threshold, silence_threshold_ms) = match name {
            ProfileName::Quick => (0.5, 160),
            ProfileName::Balanced => (0.7, 400),
            ProfileName::Patient => (0.85, 800),
            ProfileName::Dictation => (0.9, 1200),
            ProfileName::ExtraLong => (0.95, 2400),
            ProfileName::Custom => return None,
        };
        Some(Self {
            name,
            confidence_threshold,
            silence_threshold_ms,
        })
    }

    /// A custom profile; the threshold is clamped into [0, 1]
    pub fn custom(confidence_threshold: f32, silence_threshold_ms: u64) -> Self {
        let confidence_threshold = if confidence_threshold.is_nan() {
            0.0
        } else {
            confidence_threshold.clamp(0.0, 1.0)
        };
        Self {
            name: ProfileName::Custom,
            confidence_threshold,
            silence_threshold_ms,
        }
    }

    /// Resolve a name to concrete parameters, using `custom` for the custom slot
    pub fn resolve(name: ProfileName, custom: &UtteranceProfile) -> Self {
        Self::preset(name).unwrap_or_else(|| {
            Self::custom(custom.confidence_threshold, custom.silence_threshold_ms)
        })
    }

    /// Whether this word is confident enough to start the silence window
    pub fn qualifies(&self, word: &TranscriptWord) -> bool {
        word.is_final && word.confidence >= self.confidence_threshold
    }

    pub fn silence(&self) -> Duration {
        Duration::from_millis(self.silence_threshold_ms)
    }
}

impl Default for UtteranceProfile {
    fn default() -> Self {
        Self::custom(0.7, 560)
    }
}
