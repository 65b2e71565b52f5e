//! Conversation data access layer (DAO)

use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite, SqliteConnection};
use tracing::info;

use crate::im::conversation::models::{canonical_pair, Conversation};
use crate::im::db::{new_id, now_millis};
use crate::im::error::{DbResultExt, Result};

const CONVERSATION_COLUMNS: &str = "id, user_low, user_high, created_at";

/// Conversation DAO (sqlx)
#[derive(Clone)]
pub struct ConversationDao {
    db: Pool<Sqlite>,
}

impl ConversationDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Insert the conversation for the pair. A second insert for the same pair
    /// fails on UNIQUE(user_low, user_high).
    pub async fn insert(&self, a: &str, b: &str) -> Result<Conversation> {
        let mut conn = self.db.acquire().await.context("acquiring connection")?;
        Self::insert_with(&mut conn, a, b).await
    }

    pub async fn insert_with(conn: &mut SqliteConnection, a: &str, b: &str) -> Result<Conversation> {
        let (low, high) = canonical_pair(a, b);
        let conversation = Conversation {
            id: new_id(),
            user_low: low.to_string(),
            user_high: high.to_string(),
            created_at: now_millis(),
        };
        sqlx::query(
            "INSERT INTO conversations (id, user_low, user_high, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&conversation.id)
        .bind(&conversation.user_low)
        .bind(&conversation.user_high)
        .bind(conversation.created_at)
        .execute(conn)
        .await
        .context("inserting conversation")?;
        info!(
            "[ConvDAO] created {} for {} / {}",
            conversation.id, conversation.user_low, conversation.user_high
        );
        Ok(conversation)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("querying conversation")?;
        Ok(row.map(Self::row_to_conversation))
    }

    pub async fn find_between(&self, a: &str, b: &str) -> Result<Option<Conversation>> {
        let mut conn = self.db.acquire().await.context("acquiring connection")?;
        Self::find_between_with(&mut conn, a, b).await
    }

    pub async fn find_between_with(
        conn: &mut SqliteConnection,
        a: &str,
        b: &str,
    ) -> Result<Option<Conversation>> {
        let (low, high) = canonical_pair(a, b);
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE user_low = ? AND user_high = ?"
        );
        let row = sqlx::query(&sql)
            .bind(low)
            .bind(high)
            .fetch_optional(conn)
            .await
            .context("querying conversation by pair")?;
        Ok(row.map(Self::row_to_conversation))
    }

    /// Conversations the user takes part in, oldest first
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE user_low = ? OR user_high = ? ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(user_id)
            .fetch_all(&self.db)
            .await
            .context("listing conversations")?;
        Ok(rows.into_iter().map(Self::row_to_conversation).collect())
    }

    pub async fn count_between(&self, a: &str, b: &str) -> Result<i64> {
        let (low, high) = canonical_pair(a, b);
        sqlx::query_scalar("SELECT COUNT(*) FROM conversations WHERE user_low = ? AND user_high = ?")
            .bind(low)
            .bind(high)
            .fetch_one(&self.db)
            .await
            .context("counting conversations")
    }

    fn row_to_conversation(row: SqliteRow) -> Conversation {
        Conversation {
            id: row.get("id"),
            user_low: row.get("user_low"),
            user_high: row.get("user_high"),
            created_at: row.get("created_at"),
        }
    }
}
