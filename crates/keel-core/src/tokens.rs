//! Token estimation.
//!
//! The runtime tracks context budgets in tokens but never calls a real
//! tokenizer; the conventional ~4 bytes per token estimate is accurate
//! enough for budget accounting.

/// Estimate the token count of a piece of text (~4 bytes per token).
///
/// Always rounds up, so non-empty text never estimates to zero.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}
