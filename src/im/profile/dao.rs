//! Profile data access layer (DAO)
//!
//! All profile SQL lives here; the service layer owns authorization.

use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite, SqliteConnection};
use tracing::{debug, info};

use crate::im::error::{DbResultExt, Result};
use crate::im::profile::models::{Profile, ProfileUpdate};

const PROFILE_COLUMNS: &str = "id, username, display_name, avatar_url, bio, created_at";

/// Profile DAO (sqlx)
#[derive(Clone)]
pub struct ProfileDao {
    db: Pool<Sqlite>,
}

impl ProfileDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Insert on an explicit connection so provisioning can share the
    /// identity's transaction.
    pub async fn insert_with(conn: &mut SqliteConnection, profile: &Profile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO profiles (id, username, display_name, avatar_url, bio, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.username)
        .bind(&profile.display_name)
        .bind(&profile.avatar_url)
        .bind(&profile.bio)
        .bind(profile.created_at)
        .execute(conn)
        .await
        .context("inserting profile")?;
        info!("[ProfileDAO] provisioned @{} ({})", profile.username, profile.id);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Profile>> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("querying profile by id")?;
        Ok(row.map(Self::row_to_profile))
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<Profile>> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE username = ?");
        let row = sqlx::query(&sql)
            .bind(username)
            .fetch_optional(&self.db)
            .await
            .context("querying profile by username")?;
        Ok(row.map(Self::row_to_profile))
    }

    /// Apply an update; empty strings clear the optional columns.
    pub async fn update(&self, id: &str, update: &ProfileUpdate) -> Result<u64> {
        fn clearable(v: &Option<String>) -> Option<Option<String>> {
            v.as_ref().map(|s| {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            })
        }

        let res = sqlx::query(
            r#"
            UPDATE profiles SET
                display_name = COALESCE(?, display_name),
                bio = CASE WHEN ? THEN ? ELSE bio END,
                avatar_url = CASE WHEN ? THEN ? ELSE avatar_url END
            WHERE id = ?
            "#,
        )
        .bind(update.display_name.as_ref().map(|s| s.trim().to_string()))
        .bind(update.bio.is_some())
        .bind(clearable(&update.bio).flatten())
        .bind(update.avatar_url.is_some())
        .bind(clearable(&update.avatar_url).flatten())
        .bind(id)
        .execute(&self.db)
        .await
        .context("updating profile")?;
        debug!("[ProfileDAO] updated profile {}", id);
        Ok(res.rows_affected())
    }

    pub async fn set_username(&self, id: &str, username: &str) -> Result<u64> {
        let res = sqlx::query("UPDATE profiles SET username = ? WHERE id = ?")
            .bind(username)
            .bind(id)
            .execute(&self.db)
            .await
            .context("updating username")?;
        Ok(res.rows_affected())
    }

    /// Case-insensitive substring match on username or display name
    pub async fn search(&self, query: &str, limit: i64) -> Result<Vec<Profile>> {
        let escaped = query
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{}%", escaped.trim());
        let sql = format!(
            r#"
            SELECT {PROFILE_COLUMNS} FROM profiles
            WHERE username LIKE ? ESCAPE '\' OR display_name LIKE ? ESCAPE '\'
            ORDER BY username
            LIMIT ?
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(&pattern)
            .bind(&pattern)
            .bind(limit)
            .fetch_all(&self.db)
            .await
            .context("searching profiles")?;
        Ok(rows.into_iter().map(Self::row_to_profile).collect())
    }

    /// Profiles the viewer has not yet sent a follow request to, newest first
    pub async fn discover(&self, viewer_id: &str, limit: i64) -> Result<Vec<Profile>> {
        let sql = format!(
            r#"
            SELECT {PROFILE_COLUMNS} FROM profiles p
            WHERE p.id <> ?
              AND NOT EXISTS (
                  SELECT 1 FROM follow_edges f
                  WHERE f.follower_id = ? AND f.followee_id = p.id
              )
            ORDER BY p.created_at DESC, p.id
            LIMIT ?
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(viewer_id)
            .bind(viewer_id)
            .bind(limit)
            .fetch_all(&self.db)
            .await
            .context("querying discovery feed")?;
        debug!(
            "[ProfileDAO] discovery feed for {}: {} profiles",
            viewer_id,
            rows.len()
        );
        Ok(rows.into_iter().map(Self::row_to_profile).collect())
    }

    fn row_to_profile(row: SqliteRow) -> Profile {
        Profile {
            id: row.get("id"),
            username: row.get("username"),
            display_name: row.get("display_name"),
            avatar_url: row.get("avatar_url"),
            bio: row.get("bio"),
            created_at: row.get("created_at"),
        }
    }
}
