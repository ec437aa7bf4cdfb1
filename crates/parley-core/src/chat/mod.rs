//! Conversation orchestration on top of the session, context and
//! completion layers.

pub mod service;
pub mod title;

pub use service::{ChatService, ContinueRequest, ContinuedConversation, StartedConversation};
