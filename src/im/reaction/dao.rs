//! Reaction data access layer (DAO)

use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use tracing::{debug, info};

use crate::im::db::{new_id, now_millis};
use crate::im::error::{DbResultExt, Result};
use crate::im::reaction::models::Reaction;

const REACTION_COLUMNS: &str =
    "r.id AS id, r.message_id AS message_id, r.user_id AS user_id, r.emoji AS emoji, r.created_at AS created_at";

/// Reaction DAO (sqlx)
#[derive(Clone)]
pub struct ReactionDao {
    db: Pool<Sqlite>,
}

impl ReactionDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Insert a reaction; the same triple twice fails on the unique key.
    pub async fn insert(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<Reaction> {
        let reaction = Reaction {
            id: new_id(),
            message_id: message_id.to_string(),
            user_id: user_id.to_string(),
            emoji: emoji.to_string(),
            created_at: now_millis(),
        };
        sqlx::query(
            "INSERT INTO reactions (id, message_id, user_id, emoji, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&reaction.id)
        .bind(&reaction.message_id)
        .bind(&reaction.user_id)
        .bind(&reaction.emoji)
        .bind(reaction.created_at)
        .execute(&self.db)
        .await
        .context("inserting reaction")?;
        info!("[ReactionDAO] {} reacted {} on {}", user_id, emoji, message_id);
        Ok(reaction)
    }

    pub async fn find(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<Option<Reaction>> {
        let sql = format!(
            "SELECT {REACTION_COLUMNS} FROM reactions r \
             WHERE r.message_id = ? AND r.user_id = ? AND r.emoji = ?"
        );
        let row = sqlx::query(&sql)
            .bind(message_id)
            .bind(user_id)
            .bind(emoji)
            .fetch_optional(&self.db)
            .await
            .context("querying reaction")?;
        Ok(row.map(Self::row_to_reaction))
    }

    /// Delete the caller's own reaction by id. Returns false if it was already gone.
    pub async fn delete(&self, id: &str, user_id: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM reactions WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.db)
            .await
            .context("deleting reaction")?;
        debug!("[ReactionDAO] delete {}: {} rows", id, res.rows_affected());
        Ok(res.rows_affected() > 0)
    }

    pub async fn list_for_message(&self, message_id: &str) -> Result<Vec<Reaction>> {
        let sql = format!(
            "SELECT {REACTION_COLUMNS} FROM reactions r WHERE r.message_id = ? \
             ORDER BY r.created_at ASC, r.rowid ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(message_id)
            .fetch_all(&self.db)
            .await
            .context("listing reactions")?;
        Ok(rows.into_iter().map(Self::row_to_reaction).collect())
    }

    pub async fn list_by_user(&self, message_id: &str, user_id: &str) -> Result<Vec<Reaction>> {
        let sql = format!(
            "SELECT {REACTION_COLUMNS} FROM reactions r WHERE r.message_id = ? AND r.user_id = ? \
             ORDER BY r.created_at ASC, r.rowid ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(message_id)
            .bind(user_id)
            .fetch_all(&self.db)
            .await
            .context("listing own reactions")?;
        Ok(rows.into_iter().map(Self::row_to_reaction).collect())
    }

    /// Reactions on the given messages, restricted to one conversation
    pub async fn list_for_messages(
        &self,
        conversation_id: &str,
        message_ids: &[String],
    ) -> Result<Vec<Reaction>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; message_ids.len()].join(", ");
        let sql = format!(
            "SELECT {REACTION_COLUMNS} FROM reactions r \
             JOIN messages m ON m.id = r.message_id \
             WHERE m.conversation_id = ? AND r.message_id IN ({placeholders}) \
             ORDER BY r.created_at ASC, r.rowid ASC"
        );
        let mut query = sqlx::query(&sql).bind(conversation_id);
        for id in message_ids {
            query = query.bind(id);
        }
        let rows = query
            .fetch_all(&self.db)
            .await
            .context("listing reactions for messages")?;
        Ok(rows.into_iter().map(Self::row_to_reaction).collect())
    }

    /// Every reaction in a conversation
    pub async fn list_for_conversation(&self, conversation_id: &str) -> Result<Vec<Reaction>> {
        let sql = format!(
            "SELECT {REACTION_COLUMNS} FROM reactions r \
             JOIN messages m ON m.id = r.message_id \
             WHERE m.conversation_id = ? \
             ORDER BY r.created_at ASC, r.rowid ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(conversation_id)
            .fetch_all(&self.db)
            .await
            .context("listing conversation reactions")?;
        Ok(rows.into_iter().map(Self::row_to_reaction).collect())
    }

    fn row_to_reaction(row: SqliteRow) -> Reaction {
        Reaction {
            id: row.get("id"),
            message_id: row.get("message_id"),
            user_id: row.get("user_id"),
            emoji: row.get("emoji"),
            created_at: row.get("created_at"),
        }
    }
}
