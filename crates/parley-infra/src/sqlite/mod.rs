//! SQLite storage layer.
//!
//! The durable conversation store, backed by SQLite with WAL mode and
//! split read/write connection pools.

pub mod conversation;
pub mod pool;
