//! Durable-store repository traits.

pub mod conversation;
