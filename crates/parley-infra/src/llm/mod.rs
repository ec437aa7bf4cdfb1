//! Completion service clients.

pub mod openai;
