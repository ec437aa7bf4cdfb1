//! ConversationRepository trait definition.
//!
//! The durable store is the authoritative record of every conversation
//! and its turns. Follows the RPITIT pattern used by every port in this
//! crate.

use parley_types::conversation::Conversation;
use parley_types::error::RepositoryError;
use uuid::Uuid;

/// Repository trait for conversation persistence.
///
/// Implementations live in parley-infra (e.g., `SqliteConversationRepository`).
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait ConversationRepository: Send + Sync {
    /// Insert a new conversation together with its turns.
    fn create(
        &self,
        conversation: &Conversation,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace a stored conversation (title, flags, timestamps and turns).
    ///
    /// Returns `RepositoryError::NotFound` if the id does not exist.
    fn update(
        &self,
        conversation: &Conversation,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a conversation with all its turns, in insertion order.
    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Conversation>, RepositoryError>> + Send;

    /// Conversations started from `{platform, chat_id}`, most recent first
    /// (`last_activity DESC, created_at DESC`). Turns are not loaded.
    fn find_by_platform_chat(
        &self,
        platform: &str,
        chat_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Conversation>, RepositoryError>> + Send;

    /// The most recent conversation started from `{platform, chat_id}`, in
    /// the same order as `find_by_platform_chat`. Turns are not loaded.
    fn latest_by_platform_chat(
        &self,
        platform: &str,
        chat_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Conversation>, RepositoryError>> + Send;

    /// List conversations by most recent activity. Turns are not loaded.
    fn list(
        &self,
        limit: i64,
    ) -> impl std::future::Future<Output = Result<Vec<Conversation>, RepositoryError>> + Send;
}
