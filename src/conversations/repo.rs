use axum::async_trait;
use sqlx::{types::Json, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{Conversation, Message};
use crate::db::StoreError;

/// Every method is scoped by owner; another user's rows behave as absent.
#[async_trait]
pub trait ConversationRepo: Send + Sync {
    /// Most recently updated first.
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Conversation>, StoreError>;
    async fn insert(&self, conversation: &Conversation) -> Result<(), StoreError>;
    async fn rename(&self, user_id: Uuid, id: Uuid, title: &str, now: OffsetDateTime) -> Result<bool, StoreError>;
    async fn append_message(&self, user_id: Uuid, id: Uuid, message: &Message) -> Result<bool, StoreError>;
    async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<bool, StoreError>;
}

#[derive(Clone)]
pub struct PgConversationRepo {
    db: PgPool,
}

impl PgConversationRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConversationRepo for PgConversationRepo {
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Conversation>, StoreError> {
        let rows = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT id, user_id, title, messages, created_at, updated_at
              FROM conversations
             WHERE user_id = $1
             ORDER BY updated_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn insert(&self, c: &Conversation) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, user_id, title, messages, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(c.id)
        .bind(c.user_id)
        .bind(&c.title)
        .bind(&c.messages)
        .bind(c.created_at)
        .bind(c.updated_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn rename(&self, user_id: Uuid, id: Uuid, title: &str, now: OffsetDateTime) -> Result<bool, StoreError> {
        let res = sqlx::query(
            "UPDATE conversations SET title = $3, updated_at = $4 WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .bind(title)
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn append_message(&self, user_id: Uuid, id: Uuid, message: &Message) -> Result<bool, StoreError> {
        // jsonb array concatenation keeps the push a single-row atomic update
        let res = sqlx::query(
            r#"
            UPDATE conversations
               SET messages = messages || $3::jsonb, updated_at = $4
             WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(Json(vec![message]))
        .bind(message.ts)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM conversations WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
