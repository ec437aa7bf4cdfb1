//! Cache implementations.

pub mod memory;
