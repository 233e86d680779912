//! Utterance segmentation (endpointing)
//!
//! The segmenter is a plain state holder driven by the coordinator: words
//! go in through [`UtteranceSegmenter::ingest`], and the coordinator polls
//! [`UtteranceSegmenter::poll`] once the silence deadline it exposes has
//! passed. Keeping time as an explicit argument makes turn boundaries a
//! deterministic function of (words, arrival times, profile).

use tokio::time::Instant;
use tracing::debug;

use super::profile::UtteranceProfile;
use super::word::{TranscriptTurn, TranscriptWord, TurnEnd};

/// Buffers word events and emits finalized turns
#[derive(Debug)]
pub struct UtteranceSegmenter {
    profile: UtteranceProfile,
    format_turns: bool,
    /// Final words of the current utterance, in arrival order
    committed: Vec<TranscriptWord>,
    /// Revisable tail of non-final words
    interim: Vec<TranscriptWord>,
    /// Pending silence timer, armed by a qualifying word
    silence_deadline: Option<Instant>,
}

impl UtteranceSegmenter {
    pub fn new(profile: UtteranceProfile, format_turns: bool) -> Self {
        Self {
            profile,
            format_turns,
            committed: Vec::new(),
            interim: Vec::new(),
            silence_deadline: None,
        }
    }

    pub fn profile(&self) -> &UtteranceProfile {
        &self.profile
    }

    /// Switch profiles. An already-armed silence timer keeps its deadline;
    /// the new profile applies from the next word.
    pub fn set_profile(&mut self, profile: UtteranceProfile) {
        self.profile = profile;
    }

    /// Feed one word event
    pub fn ingest(&mut self, word: TranscriptWord, now: Instant) {
        if word.text.trim().is_empty() {
            debug!(timestamp_ms = word.timestamp_ms, "ignoring empty word event");
            return;
        }

        // Any new word means the speaker is still going.
        self.silence_deadline = None;

        if word.is_final {
            let ts = word.timestamp_ms;
            self.interim.retain(|w| w.timestamp_ms > ts);

            let qualifies = self.profile.qualifies(&word);
            match self.committed.iter_mut().find(|w| w.timestamp_ms == ts) {
                Some(existing) => *existing = word,
                None => self.committed.push(word),
            }

            if qualifies {
                self.silence_deadline = Some(now + self.profile.silence());
            }
        } else {
            let ts = word.timestamp_ms;
            self.interim.retain(|w| w.timestamp_ms < ts);
            self.interim.push(word);
        }
    }

    /// When the pending silence timer elapses, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.silence_deadline
    }

    /// Finalize the buffer if the silence window has elapsed
    pub fn poll(&mut self, now: Instant) -> Option<TranscriptTurn> {
        match self.silence_deadline {
            Some(deadline) if now >= deadline => self.finalize(TurnEnd::Silence),
            _ => None,
        }
    }

    /// Finalize immediately regardless of confidence or silence state
    pub fn force_end(&mut self) -> Option<TranscriptTurn> {
        self.finalize(TurnEnd::Forced)
    }

    /// Best-effort finalize after the stream dropped
    pub fn connection_lost(&mut self) -> Option<TranscriptTurn> {
        self.finalize(TurnEnd::ConnectionLost)
    }

    /// Drop any buffered words without emitting a turn
    pub fn reset(&mut self) {
        self.committed.clear();
        self.interim.clear();
        self.silence_deadline = None;
    }

    /// Words of the utterance still being spoken, for display
    pub fn in_progress(&self) -> Vec<TranscriptWord> {
        self.committed
            .iter()
            .chain(self.interim.iter())
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty() && self.interim.is_empty()
    }

    fn finalize(&mut self, end: TurnEnd) -> Option<TranscriptTurn> {
        let mut words = std::mem::take(&mut self.committed);
        words.append(&mut self.interim);
        self.silence_deadline = None;

        let turn = TranscriptTurn::finalize(words, end, self.format_turns);
        if let Some(turn) = &turn {
            debug!(?end, words = turn.words().len(), "turn finalized");
        }
        turn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn segmenter(confidence: f32, silence_ms: u64) -> UtteranceSegmenter {
        UtteranceSegmenter::new(UtteranceProfile::custom(confidence, silence_ms), false)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_confident_word_then_silence_emits_turn() {
        let start = Instant::now();
        let mut seg = segmenter(0.8, 160);

        seg.ingest(TranscriptWord::final_word("hello", 0.9, 0), start);
        assert_eq!(seg.deadline(), Some(start + ms(160)));

        assert!(seg.poll(start + ms(100)).is_none());
        let turn = seg.poll(start + ms(200)).expect("turn after silence");
        assert_eq!(turn.text(), "hello");
        assert!(turn.end_of_turn());
        assert!(seg.is_empty());
        assert!(seg.poll(start + ms(400)).is_none());
    }

    #[test]
    fn test_low_confidence_never_arms_timer() {
        let start = Instant::now();
        let mut seg = segmenter(0.8, 160);
        seg.ingest(TranscriptWord::final_word("maybe", 0.5, 0), start);
        assert!(seg.deadline().is_none());
        assert!(seg.poll(start + ms(10_000)).is_none());
        assert_eq!(seg.in_progress().len(), 1);
    }

    #[test]
    fn test_new_word_cancels_silence_timer() {
        let start = Instant::now();
        let mut seg = segmenter(0.8, 160);
        seg.ingest(TranscriptWord::final_word("hello", 0.9, 0), start);
        seg.ingest(TranscriptWord::interim("wor", 0.3, 300), start + ms(100));
        assert!(seg.deadline().is_none());
        assert!(seg.poll(start + ms(300)).is_none());

        seg.ingest(TranscriptWord::final_word("world", 0.95, 300), start + ms(250));
        let turn = seg.poll(start + ms(410)).unwrap();
        assert_eq!(turn.text(), "hello world");
    }

    #[test]
    fn test_interim_revisions_replace_tail() {
        let start = Instant::now();
        let mut seg = segmenter(0.8, 160);
        seg.ingest(TranscriptWord::interim("wreck", 0.4, 0), start);
        seg.ingest(TranscriptWord::interim("a", 0.4, 200), start);
        seg.ingest(TranscriptWord::interim("recognize", 0.5, 0), start);
        let texts: Vec<_> = seg.in_progress().into_iter().map(|w| w.text).collect();
        assert_eq!(texts, vec!["recognize"]);

        seg.ingest(TranscriptWord::final_word("recognize", 0.6, 0), start);
        seg.ingest(TranscriptWord::final_word("speech", 0.9, 400), start);
        let turn = seg.poll(start + ms(160)).unwrap();
        assert_eq!(turn.text(), "recognize speech");
    }

    #[test]
    fn test_force_end() {
        let start = Instant::now();
        let mut seg = segmenter(0.99, 5000);
        assert!(seg.force_end().is_none());

        seg.ingest(TranscriptWord::final_word("send", 0.5, 0), start);
        seg.ingest(TranscriptWord::interim("it", 0.5, 200), start);
        let turn = seg.force_end().unwrap();
        assert_eq!(turn.text(), "send it");
        assert!(!turn.end_of_turn());
        assert!(seg.is_empty());
    }

    #[test]
    fn test_profile_switch_does_not_rescore_armed_timer() {
        let start = Instant::now();
        let mut seg = segmenter(0.8, 160);
        seg.ingest(TranscriptWord::final_word("hello", 0.9, 0), start);
        seg.set_profile(UtteranceProfile::custom(0.95, 2000));
        assert_eq!(seg.deadline(), Some(start + ms(160)));
        assert!(seg.poll(start + ms(160)).is_some());

        // the next word is evaluated against the new profile
        seg.ingest(TranscriptWord::final_word("again", 0.9, 1000), start + ms(500));
        assert!(seg.deadline().is_none());
    }

    #[test]
    fn test_connection_lost_flushes_buffer() {
        let start = Instant::now();
        let mut seg = segmenter(0.8, 160);
        seg.ingest(TranscriptWord::interim("half", 0.2, 0), start);
        let turn = seg.connection_lost().unwrap();
        assert_eq!(turn.end(), TurnEnd::ConnectionLost);
        assert!(seg.connection_lost().is_none());
    }

    #[test]
    fn test_segmentation_is_deterministic() {
        let script = vec![
            (0, TranscriptWord::final_word("one", 0.9, 0)),
            (100, TranscriptWord::final_word("two", 0.6, 100)),
            (200, TranscriptWord::final_word("three", 0.95, 200)),
            (700, TranscriptWord::final_word("four", 0.9, 700)),
            (750, TranscriptWord::interim("fi", 0.2, 750)),
            (800, TranscriptWord::final_word("five", 0.85, 750)),
        ];

        let run = || {
            let start = Instant::now();
            let mut seg = segmenter(0.8, 300);
            let mut turns = Vec::new();
            for (at, word) in &script {
                let now = start + ms(*at);
                if let Some(turn) = seg.poll(now) {
                    turns.push(turn.text().to_string());
                }
                seg.ingest(word.clone(), now);
            }
            if let Some(turn) = seg.poll(start + ms(5_000)) {
                turns.push(turn.text().to_string());
            }
            turns
        };

        let first = run();
        assert_eq!(first, vec!["one two three", "four five"]);
        assert_eq!(first, run());
    }

    #[test]
    fn test_fed_words_keep_arrival_order() {
        let start = Instant::now();
        let mut seg = segmenter(0.99, 5000);
        let feed = [
            r#"{"text":"send","is_final":true,"confidence":0.9,"timestamp_ms":0}"#,
            r#"{"text":"the","is_final":true,"confidence":0.9,"timestamp_ms":180}"#,
            r#"{"text":"report","is_final":true,"confidence":0.9,"timestamp_ms":320}"#,
            // the recognizer re-finalizing a word revises it in place
            r#"{"text":"report.","is_final":true,"confidence":0.95,"timestamp_ms":320}"#,
        ];
        for json in feed {
            seg.ingest(serde_json::from_str(json).unwrap(), start);
        }
        assert_eq!(seg.force_end().unwrap().text(), "send the report.");
    }
}
