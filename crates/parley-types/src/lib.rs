//! Shared domain types for Parley.
//!
//! Conversations, turns, sessions, completion request/response shapes,
//! configuration values and the error taxonomy shared by every layer.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod session;
