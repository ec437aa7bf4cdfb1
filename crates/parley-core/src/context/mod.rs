//! Bounded conversation context.
//!
//! - `ContextWindow`: cached turn history with turn-count and token budgets
//! - `Summarizer`: AI condensation of history used when the budget is exceeded
//! - `TokenEstimator`: pluggable token cost model

pub mod summarizer;
pub mod tokens;
pub mod window;
