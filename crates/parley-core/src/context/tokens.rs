//! Token cost estimation for context budgeting.
//!
//! Estimates are heuristics, not tokenizer output; they only need to be
//! consistent so budget decisions are stable.

use parley_types::conversation::Turn;

/// Estimates the token cost of a turn.
pub trait TokenEstimator: Send + Sync {
    fn estimate_turn(&self, turn: &Turn) -> usize;

    /// Sum of per-turn estimates.
    fn estimate_turns(&self, turns: &[Turn]) -> usize {
        turns.iter().map(|t| self.estimate_turn(t)).sum()
    }
}

/// `ceil(chars / 3.5) + 4` per turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl HeuristicEstimator {
    pub const CHARS_PER_TOKEN: f64 = 3.5;
    /// Role and message framing.
    pub const PER_TURN_OVERHEAD: usize = 4;
}

impl TokenEstimator for HeuristicEstimator {
    fn estimate_turn(&self, turn: &Turn) -> usize {
        let chars = turn.content.chars().count() as f64;
        (chars / Self::CHARS_PER_TOKEN).ceil() as usize + Self::PER_TURN_OVERHEAD
    }
}
