//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token.
//! Close enough for BPE tokenizers on English text, and only ever used
//! for diagnostics; budgets themselves are enforced in characters.

use astrochat_core::message::ConversationTurn;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Estimate tokens for a single turn including per-message overhead.
///
/// Each message costs ~4 tokens of overhead for role name and delimiters
/// in the API wire format.
pub fn estimate_turn_tokens(turn: &ConversationTurn) -> usize {
    let overhead = 4;
    overhead + estimate_tokens(turn.content())
}

/// Estimate tokens for a slice of turns.
pub fn estimate_turns_tokens(turns: &[ConversationTurn]) -> usize {
    turns.iter().map(estimate_turn_tokens).sum()
}
