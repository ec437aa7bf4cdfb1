//! Fast-tier cache trait.
//!
//! Defines the interface for the low-latency, TTL-bounded cache that holds
//! session pointers, context windows and generated titles. Entries are
//! never authoritative; everything cached can be rebuilt from the durable
//! store or regenerated. Implementations live in parley-infra.

use std::time::Duration;

use parley_types::error::CacheError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Trait for a key/value cache with per-entry time-to-live.
///
/// Values are stored as JSON. A miss is `Ok(None)`, never an error;
/// errors mean the cache itself could not be reached or decoded.
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait Cache: Send + Sync {
    /// Get a value by key. Returns None on a miss or an expired entry.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<serde_json::Value>, CacheError>> + Send;

    /// Set a value for a key (upsert), expiring after `ttl`.
    fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<(), CacheError>> + Send;

    /// Delete a key. No-op if the key does not exist.
    fn delete(&self, key: &str)
    -> impl std::future::Future<Output = Result<(), CacheError>> + Send;
}

/// Fetch and decode a typed value.
pub async fn get_typed<C, T>(cache: &C, key: &str) -> Result<Option<T>, CacheError>
where
    C: Cache,
    T: DeserializeOwned,
{
    match cache.get(key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| CacheError::Decode(e.to_string())),
        None => Ok(None),
    }
}

/// Encode and store a typed value.
pub async fn set_typed<C, T>(cache: &C, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError>
where
    C: Cache,
    T: Serialize + Sync + ?Sized,
{
    let value = serde_json::to_value(value).map_err(|e| CacheError::Encode(e.to_string()))?;
    cache.set(key, value, ttl).await
}

// ---------------------------------------------------------------------------
// Key layout
// ---------------------------------------------------------------------------

/// Key of the session pointer for `{platform, chat_id}`.
pub fn session_key(platform: &str, chat_id: &str) -> String {
    format!("session:{platform}:{chat_id}")
}

/// Key of the cached context window for a conversation.
pub fn context_key(conversation_id: &Uuid) -> String {
    format!("context:{conversation_id}")
}

/// Key of a cached title, addressed by the hex digest of the first message.
pub fn title_key(digest_hex: &str) -> String {
    format!("title:{digest_hex}")
}
