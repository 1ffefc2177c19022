//! Chat conversations and messages.
//!
//! All pool-level operations are scoped by `user_id`; an ownership mismatch
//! is indistinguishable from absence. The `*_tx` variants run against a
//! caller-held connection so the streaming coordinator can keep one
//! `SELECT … FOR UPDATE` row lock across its check-then-insert sequence.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use nimbus_core::{ChatMessage, Conversation, ConversationId, MessageId, Role};

use crate::error::{Result, StoreError};
use crate::PgStore;

#[derive(FromRow)]
struct ConversationRow {
    id: Uuid,
    user_id: String,
    title: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Self {
            id: ConversationId::from_uuid(row.id),
            user_id: row.user_id,
            title: row.title,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    role: String,
    content: String,
    model: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self> {
        let role: Role = row.role.parse().map_err(StoreError::Serialization)?;
        Ok(Self {
            id: MessageId::from_uuid(row.id),
            conversation_id: ConversationId::from_uuid(row.conversation_id),
            role,
            content: row.content,
            model: row.model,
            created_at: row.created_at,
        })
    }
}

fn not_found(entity: &'static str, id: impl ToString) -> StoreError {
    StoreError::NotFound {
        entity,
        id: id.to_string(),
    }
}

impl PgStore {
    /// Create a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`].
    pub async fn create_conversation(&self, user_id: &str, title: &str) -> Result<Conversation> {
        let id = ConversationId::generate();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO chat_conversations (id, user_id, title, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $4)",
        )
        .bind(id.as_uuid())
        .bind(user_id)
        .bind(title)
        .bind(now)
        .execute(self.pool())
        .await?;
        tracing::info!(conversation_id = %id, user_id = %user_id, "Conversation created");
        Ok(Conversation {
            id,
            user_id: user_id.to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Fetch a conversation the user owns.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`].
    pub async fn get_conversation(
        &self,
        id: ConversationId,
        user_id: &str,
    ) -> Result<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(
            "SELECT id, user_id, title, created_at, updated_at \
             FROM chat_conversations WHERE id = $1 AND user_id = $2",
        )
        .bind(id.as_uuid())
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(Conversation::from))
    }

    /// Fetch a conversation under a row-level lock. The lock lives as long
    /// as the surrounding transaction and serializes concurrent writers of
    /// the same conversation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`].
    pub async fn conversation_for_update(
        conn: &mut PgConnection,
        id: ConversationId,
        user_id: &str,
    ) -> Result<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(
            "SELECT id, user_id, title, created_at, updated_at \
             FROM chat_conversations WHERE id = $1 AND user_id = $2 FOR UPDATE",
        )
        .bind(id.as_uuid())
        .bind(user_id)
        .fetch_optional(conn)
        .await?;
        Ok(row.map(Conversation::from))
    }

    /// List a user's conversations, most recently updated first. Returns the
    /// page plus the total count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`].
    pub async fn list_conversations(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Conversation>, i64)> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chat_conversations WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(self.pool())
                .await?;

        let rows: Vec<ConversationRow> = sqlx::query_as(
            "SELECT id, user_id, title, created_at, updated_at \
             FROM chat_conversations WHERE user_id = $1 \
             ORDER BY updated_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(self.pool())
        .await?;

        Ok((rows.into_iter().map(Conversation::from).collect(), total))
    }

    /// Rename a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the conversation does not exist
    /// or is not owned by the user.
    pub async fn update_conversation_title(
        &self,
        id: ConversationId,
        user_id: &str,
        title: &str,
    ) -> Result<Conversation> {
        let row: Option<ConversationRow> = sqlx::query_as(
            "UPDATE chat_conversations SET title = $3, updated_at = $4 \
             WHERE id = $1 AND user_id = $2 \
             RETURNING id, user_id, title, created_at, updated_at",
        )
        .bind(id.as_uuid())
        .bind(user_id)
        .bind(title)
        .bind(Utc::now())
        .fetch_optional(self.pool())
        .await?;
        row.map(Conversation::from)
            .ok_or_else(|| not_found("conversation", id))
    }

    /// Delete a conversation and all its messages.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the conversation does not exist
    /// or is not owned by the user.
    pub async fn delete_conversation(&self, id: ConversationId, user_id: &str) -> Result<()> {
        let mut tx = self.begin().await?;
        // The FK cascade would cover this; the explicit delete keeps the
        // message count observable for logging.
        let messages = sqlx::query("DELETE FROM chat_messages WHERE conversation_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let deleted = sqlx::query("DELETE FROM chat_conversations WHERE id = $1 AND user_id = $2")
            .bind(id.as_uuid())
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            tx.rollback().await?;
            return Err(not_found("conversation", id));
        }
        tx.commit().await?;
        tracing::info!(conversation_id = %id, messages, "Conversation deleted");
        Ok(())
    }

    /// List a conversation's messages in chronological order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the conversation does not exist
    /// or is not owned by the user.
    pub async fn list_messages(
        &self,
        conversation_id: ConversationId,
        user_id: &str,
    ) -> Result<Vec<ChatMessage>> {
        self.get_conversation(conversation_id, user_id)
            .await?
            .ok_or_else(|| not_found("conversation", conversation_id))?;

        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, conversation_id, role, content, model, created_at \
             FROM chat_messages WHERE conversation_id = $1 \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(conversation_id.as_uuid())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(ChatMessage::try_from).collect()
    }

    /// Append a message and bump the conversation's `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the conversation does not exist
    /// or is not owned by the user.
    pub async fn add_message(
        &self,
        conversation_id: ConversationId,
        user_id: &str,
        role: Role,
        content: &str,
        model: Option<&str>,
    ) -> Result<ChatMessage> {
        let mut tx = self.begin().await?;
        Self::conversation_for_update(&mut tx, conversation_id, user_id)
            .await?
            .ok_or_else(|| not_found("conversation", conversation_id))?;
        let message = Self::add_message_tx(&mut tx, conversation_id, role, content, model).await?;
        tx.commit().await?;
        Ok(message)
    }

    /// Append a message on a caller-held connection. Ownership must already
    /// be established (normally via [`PgStore::conversation_for_update`]).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`].
    pub async fn add_message_tx(
        conn: &mut PgConnection,
        conversation_id: ConversationId,
        role: Role,
        content: &str,
        model: Option<&str>,
    ) -> Result<ChatMessage> {
        let id = MessageId::generate();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO chat_messages (id, conversation_id, role, content, model, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id.as_uuid())
        .bind(conversation_id.as_uuid())
        .bind(role.as_str())
        .bind(content)
        .bind(model)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        sqlx::query("UPDATE chat_conversations SET updated_at = $2 WHERE id = $1")
            .bind(conversation_id.as_uuid())
            .bind(now)
            .execute(&mut *conn)
            .await?;
        Ok(ChatMessage {
            id,
            conversation_id,
            role,
            content: content.to_string(),
            model: model.map(ToString::to_string),
            created_at: now,
        })
    }

    /// The most recent message with the given role, on a caller-held
    /// connection. Used for the duplicate-submission probe.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`].
    pub async fn last_message_with_role_tx(
        conn: &mut PgConnection,
        conversation_id: ConversationId,
        role: Role,
    ) -> Result<Option<ChatMessage>> {
        let row: Option<MessageRow> = sqlx::query_as(
            "SELECT id, conversation_id, role, content, model, created_at \
             FROM chat_messages WHERE conversation_id = $1 AND role = $2 \
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(conversation_id.as_uuid())
        .bind(role.as_str())
        .fetch_optional(conn)
        .await?;
        row.map(ChatMessage::try_from).transpose()
    }

    /// Whether an assistant message with identical content and model already
    /// exists in the conversation. Second-layer dedupe for stream replays.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`].
    pub async fn assistant_message_exists_tx(
        conn: &mut PgConnection,
        conversation_id: ConversationId,
        content: &str,
        model: Option<&str>,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(\
               SELECT 1 FROM chat_messages \
               WHERE conversation_id = $1 AND role = 'assistant' \
                 AND content = $2 AND model IS NOT DISTINCT FROM $3)",
        )
        .bind(conversation_id.as_uuid())
        .bind(content)
        .bind(model)
        .fetch_one(conn)
        .await?;
        Ok(exists)
    }

    /// Rename a conversation on a caller-held connection (auto-titling).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`].
    pub async fn update_title_tx(
        conn: &mut PgConnection,
        conversation_id: ConversationId,
        title: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE chat_conversations SET title = $2, updated_at = $3 WHERE id = $1")
            .bind(conversation_id.as_uuid())
            .bind(title)
            .bind(Utc::now())
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Delete a single message and bump the parent's `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the message does not exist or
    /// belongs to another user's conversation.
    pub async fn delete_message(&self, message_id: MessageId, user_id: &str) -> Result<()> {
        let mut tx = self.begin().await?;
        let conversation_id: Option<Uuid> = sqlx::query_scalar(
            "DELETE FROM chat_messages m \
             USING chat_conversations c \
             WHERE m.id = $1 AND m.conversation_id = c.id AND c.user_id = $2 \
             RETURNING m.conversation_id",
        )
        .bind(message_id.as_uuid())
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(conversation_id) = conversation_id else {
            tx.rollback().await?;
            return Err(not_found("message", message_id));
        };
        sqlx::query("UPDATE chat_conversations SET updated_at = $2 WHERE id = $1")
            .bind(conversation_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(message_id = %message_id, "Message deleted");
        Ok(())
    }
}
