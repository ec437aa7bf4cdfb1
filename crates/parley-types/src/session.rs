//! Session pointers from an external identity to a conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;

/// External identity triple an inbound message arrives with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub platform: String,
    pub user_id: String,
    pub chat_id: String,
}

impl SessionIdentity {
    pub fn new(
        platform: impl Into<String>,
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            user_id: user_id.into(),
            chat_id: chat_id.into(),
        }
    }

    /// Reject identities with a blank component.
    pub fn validate(&self) -> Result<(), SessionError> {
        for (field, value) in [
            ("platform", &self.platform),
            ("user_id", &self.user_id),
            ("chat_id", &self.chat_id),
        ] {
            if value.trim().is_empty() {
                return Err(SessionError::InvalidIdentity(format!("{field} is required")));
            }
        }
        Ok(())
    }
}

/// Cached pointer from `{platform, chat_id}` to a conversation.
///
/// Not authoritative: the durable conversation is. A session can always be
/// rebuilt from the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub conversation_id: Uuid,
    pub platform: String,
    pub user_id: String,
    pub chat_id: String,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(conversation_id: Uuid, identity: &SessionIdentity) -> Self {
        Self {
            conversation_id,
            platform: identity.platform.clone(),
            user_id: identity.user_id.clone(),
            chat_id: identity.chat_id.clone(),
            last_activity: Utc::now(),
        }
    }
}

/// Outcome of resolving an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub conversation_id: Uuid,
    /// True when the resolver created the conversation (with the first
    /// message already stored as its first turn).
    pub created: bool,
}
