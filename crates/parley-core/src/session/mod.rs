//! Session resolution: external identity -> conversation id.

pub mod resolver;
