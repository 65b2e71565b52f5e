//! Follow ledger data access layer (DAO)

use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite, SqliteConnection, Transaction};
use tracing::{debug, info};

use crate::im::db::{new_id, now_millis};
use crate::im::error::{DbResultExt, Result};
use crate::im::follow::models::{FollowEdge, FollowStatus};

const EDGE_COLUMNS: &str = "id, follower_id, followee_id, status, created_at, updated_at";

/// Follow edge DAO (sqlx)
#[derive(Clone)]
pub struct FollowDao {
    db: Pool<Sqlite>,
}

impl FollowDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Insert a pending edge; a duplicate ordered pair fails on the unique key.
    pub async fn insert_pending(&self, follower_id: &str, followee_id: &str) -> Result<FollowEdge> {
        let now = now_millis();
        let edge = FollowEdge {
            id: new_id(),
            follower_id: follower_id.to_string(),
            followee_id: followee_id.to_string(),
            status: FollowStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            r#"
            INSERT INTO follow_edges (id, follower_id, followee_id, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&edge.id)
        .bind(&edge.follower_id)
        .bind(&edge.followee_id)
        .bind(edge.status.as_str())
        .bind(edge.created_at)
        .bind(edge.updated_at)
        .execute(&self.db)
        .await
        .context("inserting follow edge")?;
        info!("[FollowDAO] {} -> {} pending ({})", follower_id, followee_id, edge.id);
        Ok(edge)
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.db.begin().await.context("starting follow transaction")
    }

    pub async fn get(&self, id: &str) -> Result<Option<FollowEdge>> {
        let mut conn = self.db.acquire().await.context("acquiring connection")?;
        Self::get_with(&mut conn, id).await
    }

    pub async fn get_with(conn: &mut SqliteConnection, id: &str) -> Result<Option<FollowEdge>> {
        let sql = format!("SELECT {EDGE_COLUMNS} FROM follow_edges WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await
            .context("querying follow edge")?;
        row.map(Self::row_to_edge).transpose()
    }

    pub async fn find(&self, follower_id: &str, followee_id: &str) -> Result<Option<FollowEdge>> {
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM follow_edges WHERE follower_id = ? AND followee_id = ?"
        );
        let row = sqlx::query(&sql)
            .bind(follower_id)
            .bind(followee_id)
            .fetch_optional(&self.db)
            .await
            .context("querying follow edge by pair")?;
        row.map(Self::row_to_edge).transpose()
    }

    /// Move a pending edge to `status`. Returns false when nothing matched
    /// (unknown id, wrong followee, or no longer pending).
    pub async fn resolve_with(
        conn: &mut SqliteConnection,
        id: &str,
        followee_id: &str,
        status: FollowStatus,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE follow_edges SET status = ?, updated_at = ?
            WHERE id = ? AND followee_id = ? AND status = 'pending'
            "#,
        )
        .bind(status.as_str())
        .bind(now_millis())
        .bind(id)
        .bind(followee_id)
        .execute(conn)
        .await
        .context("resolving follow edge")?;
        debug!("[FollowDAO] resolve {} -> {}: {} rows", id, status, res.rows_affected());
        Ok(res.rows_affected() > 0)
    }

    /// Delete a still-pending edge owned by `follower_id`
    pub async fn delete_pending(&self, id: &str, follower_id: &str) -> Result<bool> {
        let res = sqlx::query(
            "DELETE FROM follow_edges WHERE id = ? AND follower_id = ? AND status = 'pending'",
        )
        .bind(id)
        .bind(follower_id)
        .execute(&self.db)
        .await
        .context("deleting follow edge")?;
        Ok(res.rows_affected() > 0)
    }

    /// True iff an accepted edge links `a` and `b` in either direction
    pub async fn is_connected(&self, a: &str, b: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM follow_edges
            WHERE status = 'accepted'
              AND ((follower_id = ? AND followee_id = ?) OR (follower_id = ? AND followee_id = ?))
            LIMIT 1
            "#,
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_optional(&self.db)
        .await
        .context("checking connection")?;
        Ok(found.is_some())
    }

    pub async fn list_incoming(&self, followee_id: &str, status: FollowStatus) -> Result<Vec<FollowEdge>> {
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM follow_edges WHERE followee_id = ? AND status = ? ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(followee_id)
            .bind(status.as_str())
            .fetch_all(&self.db)
            .await
            .context("listing incoming follow edges")?;
        rows.into_iter().map(Self::row_to_edge).collect()
    }

    pub async fn list_outgoing(&self, follower_id: &str) -> Result<Vec<FollowEdge>> {
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM follow_edges WHERE follower_id = ? ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(follower_id)
            .fetch_all(&self.db)
            .await
            .context("listing outgoing follow edges")?;
        rows.into_iter().map(Self::row_to_edge).collect()
    }

    /// Identities linked to `user_id` by an accepted edge, either direction
    pub async fn connections(&self, user_id: &str) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT CASE WHEN follower_id = ? THEN followee_id ELSE follower_id END
            FROM follow_edges
            WHERE status = 'accepted' AND (follower_id = ? OR followee_id = ?)
            ORDER BY 1
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.db)
        .await
        .context("listing connections")?;
        Ok(ids)
    }

    fn row_to_edge(row: SqliteRow) -> Result<FollowEdge> {
        let status: String = row.get("status");
        Ok(FollowEdge {
            id: row.get("id"),
            follower_id: row.get("follower_id"),
            followee_id: row.get("followee_id"),
            status: status.parse()?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}
