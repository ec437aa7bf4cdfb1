//! Reliability core and port trait definitions for Parley.
//!
//! This crate defines the "ports" (cache, repository and completion
//! traits) that the infrastructure layer implements, plus the resilience
//! primitives and the services built on top of them. It depends only on
//! `parley-types` -- never on `parley-infra` or any database/IO crate.

pub mod cache;
pub mod chat;
pub mod context;
pub mod llm;
pub mod repository;
pub mod resilience;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;
