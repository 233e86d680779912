//! Transcript module: word events, finalized turns and endpointing
//!
//! Words arrive from the recognition transport one event at a time. The
//! [`UtteranceSegmenter`] buffers them and decides, using the active
//! [`UtteranceProfile`], when an utterance is complete.

mod profile;
mod segmenter;
mod word;

pub use profile::{ProfileName, UtteranceProfile};
pub use segmenter::UtteranceSegmenter;
pub use word::{TranscriptTurn, TranscriptWord, TurnEnd};

pub(crate) use word::format_text;
