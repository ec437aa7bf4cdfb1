//! Conversation and turn types for Parley.
//!
//! A conversation is the authoritative record kept in the durable store.
//! Its turns are also mirrored into the fast cache by the context window,
//! which may hold a reduced (summarized or truncated) view of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

use crate::llm::MessageRole;

/// Title given to conversations before one has been generated.
pub const UNTITLED_CONVERSATION: &str = "Untitled conversation";

/// Platform tag for conversations started through the direct API.
pub const DEFAULT_PLATFORM: &str = "api";

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnRole::User => write!(f, "user"),
            TurnRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for TurnRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(TurnRole::User),
            "assistant" => Ok(TurnRole::Assistant),
            other => Err(format!("invalid turn role: '{other}'")),
        }
    }
}

impl From<TurnRole> for MessageRole {
    fn from(role: TurnRole) -> Self {
        match role {
            TurnRole::User => MessageRole::User,
            TurnRole::Assistant => MessageRole::Assistant,
        }
    }
}

/// One message within a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Turn {
    /// Create a turn stamped with the current time.
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            role,
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }
}

/// A conversation between an external user and the assistant.
///
/// `user_id` and `chat_id` are the external identity the conversation was
/// resolved from; both are `None` for conversations started through the
/// direct API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub title: String,
    pub platform: String,
    pub user_id: Option<String>,
    pub chat_id: Option<String>,
    pub is_active: bool,
    /// Ordered by insertion. Empty in list results.
    pub turns: Vec<Turn>,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create an active, untitled conversation whose first turn is `first_message`.
    pub fn new(
        platform: impl Into<String>,
        user_id: Option<String>,
        chat_id: Option<String>,
        first_message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            title: UNTITLED_CONVERSATION.to_string(),
            platform: platform.into(),
            user_id,
            chat_id,
            is_active: true,
            turns: vec![Turn::user(first_message)],
            last_activity: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a turn and bump the activity timestamps.
    pub fn push_turn(&mut self, turn: Turn) {
        let now = Utc::now();
        self.turns.push(turn);
        self.last_activity = now;
        self.updated_at = now;
    }

    /// Content of the first user turn, if any.
    pub fn first_user_message(&self) -> Option<&str> {
        self.turns
            .iter()
            .find(|t| t.role == TurnRole::User)
            .map(|t| t.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_role_roundtrip() {
        for role in [TurnRole::User, TurnRole::Assistant] {
            let parsed: TurnRole = role.to_string().parse().unwrap();
            assert_eq!(role, parsed);
        }
        assert!("system".parse::<TurnRole>().is_err());
    }

    #[test]
    fn test_turn_role_serde() {
        let json = serde_json::to_string(&TurnRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }

    #[test]
    fn test_turn_role_into_message_role() {
        assert_eq!(MessageRole::from(TurnRole::User), MessageRole::User);
        assert_eq!(MessageRole::from(TurnRole::Assistant), MessageRole::Assistant);
    }

    #[test]
    fn test_new_conversation_has_first_turn() {
        let conv = Conversation::new("telegram", Some("u1".into()), Some("c1".into()), "hello");
        assert_eq!(conv.title, UNTITLED_CONVERSATION);
        assert!(conv.is_active);
        assert_eq!(conv.turns.len(), 1);
        assert_eq!(conv.turns[0].role, TurnRole::User);
        assert_eq!(conv.first_user_message(), Some("hello"));
    }

    #[test]
    fn test_push_turn_updates_activity() {
        let mut conv = Conversation::new(DEFAULT_PLATFORM, None, None, "hi");
        let before = conv.last_activity;
        conv.push_turn(Turn::assistant("hello there"));
        assert_eq!(conv.turns.len(), 2);
        assert!(conv.last_activity >= before);
        assert_eq!(conv.updated_at, conv.last_activity);
    }
}
