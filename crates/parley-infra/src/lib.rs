//! Infrastructure layer for Parley.
//!
//! Implementations of the ports defined in `parley-core`: the in-memory
//! TTL cache, SQLite conversation storage, the OpenAI-compatible completion
//! client, and the configuration loader.

pub mod cache;
pub mod config;
pub mod llm;
pub mod sqlite;
