//! Lexical trigger matching.
//!
//! The built-in baseline for deciding when a capability's trigger
//! description matches the session's active task text: case-insensitive
//! word overlap, plus explicit `@id` mentions which always trigger.
//! Semantic matching is a host concern layered on top of this.

use std::collections::HashSet;

/// Trigger words shorter than this carry no signal and are ignored.
const MIN_TRIGGER_WORD_LEN: usize = 3;

/// Split text into lowercase alphanumeric words.
#[must_use]
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Extract explicit `@id` mentions from text.
#[must_use]
pub fn mentions(text: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    for word in text.split_whitespace() {
        if let Some(rest) = word.strip_prefix('@') {
            let id: String = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
                .collect();
            if !id.is_empty() {
                let _ = out.insert(id.to_lowercase());
            }
        }
    }
    out
}

/// Whether a trigger description matches already-tokenized task text.
///
/// Matches when any significant trigger word appears in the task text.
/// Deliberately coarse: false positives cost one body load, false
/// negatives cost a capability going unused.
#[must_use]
pub fn trigger_matches(trigger: &str, task_words: &HashSet<String>) -> bool {
    tokenize(trigger)
        .iter()
        .filter(|w| w.len() >= MIN_TRIGGER_WORD_LEN)
        .any(|w| task_words.contains(w))
}
