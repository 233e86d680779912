//! Wake and sleep phrase matching
//!
//! Matching runs on finalized turn text only. Both sides are normalized
//! (lower-case, punctuation dropped) and a phrase matches when it equals
//! the turn or is a whole-word prefix of it.

/// A phrase match: what was said after the phrase, in original spelling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhraseMatch {
    pub phrase: String,
    pub remainder: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PhraseSet {
    wake: Vec<Vec<String>>,
    sleep: Vec<Vec<String>>,
}

impl PhraseSet {
    pub fn new<S: AsRef<str>>(wake: &[S], sleep: &[S]) -> Self {
        Self {
            wake: compile(wake),
            sleep: compile(sleep),
        }
    }

    pub fn match_wake(&self, text: &str) -> Option<PhraseMatch> {
        find(&self.wake, text)
    }

    pub fn match_sleep(&self, text: &str) -> Option<PhraseMatch> {
        find(&self.sleep, text)
    }
}

/// Lower-case alphanumerics only
fn normalize_token(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '\'')
        .flat_map(char::to_lowercase)
        .collect()
}

fn compile<S: AsRef<str>>(phrases: &[S]) -> Vec<Vec<String>> {
    let mut compiled: Vec<Vec<String>> = phrases
        .iter()
        .map(|p| {
            p.as_ref()
                .split_whitespace()
                .map(normalize_token)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|tokens| !tokens.is_empty())
        .collect();
    // Longest phrase wins when several share a prefix
    compiled.sort_by(|a, b| b.len().cmp(&a.len()));
    compiled
}

fn find(phrases: &[Vec<String>], text: &str) -> Option<PhraseMatch> {
    let tokens: Vec<(String, &str)> = text
        .split_whitespace()
        .map(|raw| (normalize_token(raw), raw))
        .filter(|(norm, _)| !norm.is_empty())
        .collect();

    phrases.iter().find_map(|phrase| {
        if tokens.len() < phrase.len() {
            return None;
        }
        let is_prefix = phrase
            .iter()
            .zip(tokens.iter())
            .all(|(want, (got, _))| want == got);
        if !is_prefix {
            return None;
        }

        let rest: Vec<&str> = tokens[phrase.len()..].iter().map(|(_, raw)| *raw).collect();
        Some(PhraseMatch {
            phrase: phrase.join(" "),
            remainder: (!rest.is_empty()).then(|| rest.join(" ")),
        })
    })
}
