//! Completion provider abstractions for Parley.
//!
//! - `LlmProvider`: RPITIT trait for concrete provider implementations
//! - `BoxLlmProvider`: Object-safe wrapper for dynamic dispatch
//! - `ResilientProvider`: retry + circuit breaker decorator

pub mod box_provider;
pub mod provider;
pub mod resilient;
