//! Message data access layer (DAO)
//!
//! Append and read only; the schema refuses updates to stored messages.

use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite, SqliteConnection};
use tracing::{debug, info};

use crate::im::db::{new_id, now_millis};
use crate::im::error::{DbResultExt, Result};
use crate::im::message::models::{Message, MessageCursor, MessageKind};

const MESSAGE_COLUMNS: &str =
    "seq, id, conversation_id, sender_id, kind, content, media_url, created_at";

/// Fields supplied by the caller; id, seq and timestamp are assigned here.
pub struct NewMessage<'a> {
    pub conversation_id: &'a str,
    pub sender_id: &'a str,
    pub kind: MessageKind,
    pub content: &'a str,
    pub media_url: Option<&'a str>,
}

/// Message DAO (sqlx)
#[derive(Clone)]
pub struct MessageDao {
    db: Pool<Sqlite>,
}

impl MessageDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    pub async fn append(&self, new: NewMessage<'_>) -> Result<Message> {
        let mut conn = self.db.acquire().await.context("acquiring connection")?;
        Self::append_with(&mut conn, new).await
    }

    /// Append on an explicit connection so the insert can join a caller's
    /// transaction.
    ///
    /// `created_at` is clamped to the newest stamp already in the
    /// conversation while the write lock is held, so (created_at, seq) order
    /// matches commit order and a cursor never skips a late committer.
    pub async fn append_with(conn: &mut SqliteConnection, new: NewMessage<'_>) -> Result<Message> {
        let id = new_id();
        let row = sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, kind, content, media_url, created_at)
            VALUES (?, ?, ?, ?, ?, ?, MAX(?, COALESCE(
                (SELECT MAX(created_at) FROM messages WHERE conversation_id = ?), 0)))
            RETURNING seq, created_at
            "#,
        )
        .bind(&id)
        .bind(new.conversation_id)
        .bind(new.sender_id)
        .bind(new.kind.as_str())
        .bind(new.content)
        .bind(new.media_url)
        .bind(now_millis())
        .bind(new.conversation_id)
        .fetch_one(conn)
        .await
        .context("appending message")?;

        let message = Message {
            id,
            seq: row.get("seq"),
            conversation_id: new.conversation_id.to_string(),
            sender_id: new.sender_id.to_string(),
            kind: new.kind,
            content: new.content.to_string(),
            media_url: new.media_url.map(str::to_string),
            created_at: row.get("created_at"),
        };
        info!(
            "[MessageDAO] {} #{} in {} ({})",
            message.kind, message.seq, message.conversation_id, message.id
        );
        Ok(message)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Message>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("querying message")?;
        row.map(Self::row_to_message).transpose()
    }

    /// Messages strictly after `cursor`, ascending by (created_at, seq)
    pub async fn list_since(
        &self,
        conversation_id: &str,
        cursor: Option<MessageCursor>,
    ) -> Result<Vec<Message>> {
        let rows = match cursor {
            None => {
                let sql = format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ? \
                     ORDER BY created_at ASC, seq ASC"
                );
                sqlx::query(&sql)
                    .bind(conversation_id)
                    .fetch_all(&self.db)
                    .await
            }
            Some(cursor) => {
                let sql = format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ? \
                     AND (created_at > ? OR (created_at = ? AND seq > ?)) \
                     ORDER BY created_at ASC, seq ASC"
                );
                sqlx::query(&sql)
                    .bind(conversation_id)
                    .bind(cursor.created_at)
                    .bind(cursor.created_at)
                    .bind(cursor.seq)
                    .fetch_all(&self.db)
                    .await
            }
        }
        .context("listing messages")?;
        debug!("[MessageDAO] {} rows from {}", rows.len(), conversation_id);
        rows.into_iter().map(Self::row_to_message).collect()
    }

    /// Last message in log order
    pub async fn latest(&self, conversation_id: &str) -> Result<Option<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ? \
             ORDER BY created_at DESC, seq DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(conversation_id)
            .fetch_optional(&self.db)
            .await
            .context("querying latest message")?;
        row.map(Self::row_to_message).transpose()
    }

    pub async fn count(&self, conversation_id: &str) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .fetch_one(&self.db)
            .await
            .context("counting messages")
    }

    fn row_to_message(row: SqliteRow) -> Result<Message> {
        let kind: String = row.get("kind");
        Ok(Message {
            id: row.get("id"),
            seq: row.get("seq"),
            conversation_id: row.get("conversation_id"),
            sender_id: row.get("sender_id"),
            kind: kind.parse()?,
            content: row.get("content"),
            media_url: row.get("media_url"),
            created_at: row.get("created_at"),
        })
    }
}
