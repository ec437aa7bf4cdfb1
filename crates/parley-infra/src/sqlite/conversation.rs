//! SQLite conversation repository implementation.
//!
//! Implements `ConversationRepository` from `parley-core`. A conversation
//! row lives in `conversations`; its turns live in `conversation_turns`
//! keyed by position. Creates and updates run in a transaction on the
//! writer pool so a conversation and its turns always change together.

use chrono::{DateTime, SecondsFormat, Utc};
use parley_core::repository::conversation::ConversationRepository;
use parley_types::conversation::{Conversation, Turn, TurnRole};
use parley_types::error::RepositoryError;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ConversationRepository`.
pub struct SqliteConversationRepository {
    pool: DatabasePool,
}

impl SqliteConversationRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn load_turns(&self, id: &Uuid) -> Result<Vec<Turn>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT role, content, created_at, updated_at FROM conversation_turns
             WHERE conversation_id = ? ORDER BY position ASC",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| TurnRow::from_row(row).map_err(query_error)?.into_turn())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct ConversationRow {
    id: String,
    title: String,
    platform: String,
    user_id: Option<String>,
    chat_id: Option<String>,
    is_active: bool,
    last_activity: String,
    created_at: String,
    updated_at: String,
}

impl ConversationRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            platform: row.try_get("platform")?,
            user_id: row.try_get("user_id")?,
            chat_id: row.try_get("chat_id")?,
            is_active: row.try_get("is_active")?,
            last_activity: row.try_get("last_activity")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_conversation(self, turns: Vec<Turn>) -> Result<Conversation, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid conversation id: {e}")))?;

        Ok(Conversation {
            id,
            title: self.title,
            platform: self.platform,
            user_id: self.user_id,
            chat_id: self.chat_id,
            is_active: self.is_active,
            turns,
            last_activity: parse_datetime(&self.last_activity)?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct TurnRow {
    role: String,
    content: String,
    created_at: String,
    updated_at: String,
}

impl TurnRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_turn(self) -> Result<Turn, RepositoryError> {
        let role: TurnRole = self.role.parse().map_err(RepositoryError::Query)?;
        Ok(Turn {
            role,
            content: self.content,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width UTC timestamps, so string order is time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Map conversation rows without loading their turns.
fn summaries(rows: &[SqliteRow]) -> Result<Vec<Conversation>, RepositoryError> {
    rows.iter()
        .map(|row| {
            ConversationRow::from_row(row)
                .map_err(query_error)?
                .into_conversation(Vec::new())
        })
        .collect()
}

fn query_error(e: sqlx::Error) -> RepositoryError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RepositoryError::Connection
        }
        other => RepositoryError::Query(other.to_string()),
    }
}

async fn insert_turns(
    tx: &mut Transaction<'_, Sqlite>,
    conversation_id: &Uuid,
    turns: &[Turn],
) -> Result<(), RepositoryError> {
    for (position, turn) in turns.iter().enumerate() {
        sqlx::query(
            "INSERT INTO conversation_turns (conversation_id, position, role, content, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(conversation_id.to_string())
        .bind(position as i64)
        .bind(turn.role.to_string())
        .bind(&turn.content)
        .bind(format_datetime(&turn.created_at))
        .bind(format_datetime(&turn.updated_at))
        .execute(&mut **tx)
        .await
        .map_err(query_error)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ConversationRepository implementation
// ---------------------------------------------------------------------------

impl ConversationRepository for SqliteConversationRepository {
    async fn create(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        sqlx::query(
            r#"INSERT INTO conversations (id, title, platform, user_id, chat_id, is_active, last_activity, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(conversation.id.to_string())
        .bind(&conversation.title)
        .bind(&conversation.platform)
        .bind(&conversation.user_id)
        .bind(&conversation.chat_id)
        .bind(conversation.is_active)
        .bind(format_datetime(&conversation.last_activity))
        .bind(format_datetime(&conversation.created_at))
        .bind(format_datetime(&conversation.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.message().contains("UNIQUE") {
                    return RepositoryError::Conflict(format!(
                        "conversation {} already exists",
                        conversation.id
                    ));
                }
            }
            query_error(e)
        })?;

        insert_turns(&mut tx, &conversation.id, &conversation.turns).await?;
        tx.commit().await.map_err(query_error)?;

        tracing::debug!(conversation_id = %conversation.id, turns = conversation.turns.len(), "conversation inserted");
        Ok(())
    }

    async fn update(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let result = sqlx::query(
            r#"UPDATE conversations
               SET title = ?, is_active = ?, last_activity = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&conversation.title)
        .bind(conversation.is_active)
        .bind(format_datetime(&conversation.last_activity))
        .bind(format_datetime(&conversation.updated_at))
        .bind(conversation.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            // Dropping the transaction rolls it back.
            return Err(RepositoryError::NotFound);
        }

        sqlx::query("DELETE FROM conversation_turns WHERE conversation_id = ?")
            .bind(conversation.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        insert_turns(&mut tx, &conversation.id, &conversation.turns).await?;

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let conversation_row = ConversationRow::from_row(&row).map_err(query_error)?;
        let turns = self.load_turns(id).await?;
        Ok(Some(conversation_row.into_conversation(turns)?))
    }

    async fn find_by_platform_chat(
        &self,
        platform: &str,
        chat_id: &str,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM conversations WHERE platform = ? AND chat_id = ?
             ORDER BY last_activity DESC, created_at DESC",
        )
        .bind(platform)
        .bind(chat_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        summaries(&rows)
    }

    async fn latest_by_platform_chat(
        &self,
        platform: &str,
        chat_id: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM conversations WHERE platform = ? AND chat_id = ?
             ORDER BY last_activity DESC, created_at DESC LIMIT 1",
        )
        .bind(platform)
        .bind(chat_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        row.map(|row| {
            ConversationRow::from_row(&row)
                .map_err(query_error)?
                .into_conversation(Vec::new())
        })
        .transpose()
    }

    async fn list(&self, limit: i64) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM conversations ORDER BY last_activity DESC, created_at DESC LIMIT ?",
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        summaries(&rows)
    }
}
