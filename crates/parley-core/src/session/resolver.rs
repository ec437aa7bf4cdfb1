//! Identity-to-conversation resolution across the cache and durable store.
//!
//! The cache holds a `Session` pointer per `{platform, chat_id}` with a
//! sliding TTL. When the pointer is missing (expired, evicted, or the cache
//! is unreachable) the durable store is consulted before anything new is
//! created, so an evicted session recovers its conversation.
//!
//! Two concurrent first messages for the same identity on a cold cache can
//! both create a conversation; the later cache write wins. No cross-process
//! lock is taken.

use std::sync::Arc;
use std::time::Duration;

use parley_types::conversation::Conversation;
use parley_types::error::SessionError;
use parley_types::session::{Resolution, Session, SessionIdentity};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{self, Cache};
use crate::repository::conversation::ConversationRepository;
use crate::resilience::cancellable;

/// Resolves external identities to conversation ids.
pub struct SessionResolver<C: Cache, R: ConversationRepository> {
    cache: Arc<C>,
    repo: Arc<R>,
    ttl: Duration,
}

impl<C: Cache, R: ConversationRepository> SessionResolver<C, R> {
    pub fn new(cache: Arc<C>, repo: Arc<R>, ttl: Duration) -> Self {
        Self { cache, repo, ttl }
    }

    /// Resolve `identity` to a conversation, creating one (with
    /// `first_message` as its first turn) if none exists.
    #[tracing::instrument(
        name = "resolve_session",
        skip(self, identity, first_message, cancel),
        fields(platform = %identity.platform, chat_id = %identity.chat_id)
    )]
    pub async fn resolve(
        &self,
        identity: &SessionIdentity,
        first_message: &str,
        cancel: &CancellationToken,
    ) -> Result<Resolution, SessionError> {
        identity.validate()?;
        let key = cache::session_key(&identity.platform, &identity.chat_id);

        // 1. Cached pointer.
        let cached = cancellable(cancel, cache::get_typed::<C, Session>(self.cache.as_ref(), &key))
            .await
            .ok_or(SessionError::Cancelled)?;
        match cached {
            Ok(Some(mut session)) => {
                debug!(conversation_id = %session.conversation_id, "session cache hit");
                session.last_activity = chrono::Utc::now();
                self.store_session(&key, &session).await;
                return Ok(Resolution {
                    conversation_id: session.conversation_id,
                    created: false,
                });
            }
            Ok(None) => debug!("session cache miss"),
            Err(e) => warn!(error = %e, "session cache read failed, checking durable store"),
        }

        // 2. Recovery of the most recent conversation from the durable store.
        let existing = cancellable(
            cancel,
            self.repo
                .latest_by_platform_chat(&identity.platform, &identity.chat_id),
        )
        .await
        .ok_or(SessionError::Cancelled)??;

        if let Some(latest) = existing {
            info!(conversation_id = %latest.id, "session recovered from durable store");
            self.store_session(&key, &Session::new(latest.id, identity))
                .await;
            return Ok(Resolution {
                conversation_id: latest.id,
                created: false,
            });
        }

        // 3. New conversation.
        let conversation = Conversation::new(
            identity.platform.clone(),
            Some(identity.user_id.clone()),
            Some(identity.chat_id.clone()),
            first_message,
        );
        cancellable(cancel, self.repo.create(&conversation))
            .await
            .ok_or(SessionError::Cancelled)??;

        info!(conversation_id = %conversation.id, "conversation created for new session");
        self.store_session(&key, &Session::new(conversation.id, identity))
            .await;

        Ok(Resolution {
            conversation_id: conversation.id,
            created: true,
        })
    }

    /// Drop the cached pointer for `{platform, chat_id}`. Errors are logged.
    pub async fn invalidate(&self, platform: &str, chat_id: &str) {
        let key = cache::session_key(platform, chat_id);
        if let Err(e) = self.cache.delete(&key).await {
            warn!(platform, chat_id, error = %e, "failed to invalidate session");
        }
    }

    /// Conversation id currently cached for `{platform, chat_id}`, if any.
    pub async fn cached_conversation(&self, platform: &str, chat_id: &str) -> Option<Uuid> {
        let key = cache::session_key(platform, chat_id);
        match cache::get_typed::<C, Session>(self.cache.as_ref(), &key).await {
            Ok(session) => session.map(|s| s.conversation_id),
            Err(e) => {
                warn!(platform, chat_id, error = %e, "session cache read failed");
                None
            }
        }
    }

    async fn store_session(&self, key: &str, session: &Session) {
        if let Err(e) = cache::set_typed(self.cache.as_ref(), key, session, self.ttl).await {
            warn!(
                conversation_id = %session.conversation_id,
                error = %e,
                "failed to write session to cache"
            );
        }
    }
}
