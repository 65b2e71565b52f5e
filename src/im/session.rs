//! Explicit session context and identity registration
//!
//! There is no ambient "current user": every service call receives a
//! [`Session`] and validates it through [`Identities::authenticate`].

use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, warn};

use crate::im::db::{new_id, now_millis};
use crate::im::error::{ChatError, DbResultExt, Result};
use crate::im::profile::dao::ProfileDao;
use crate::im::profile::models::{normalize_username, Profile, USERNAME_MAX_LEN};

/// How many numbered variants of a taken username are tried before falling
/// back to a random suffix.
const USERNAME_ATTEMPTS: usize = 20;

/// Caller identity plus the token that proves it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub token: String,
}

impl Session {
    /// A session that never authenticates
    pub fn anonymous() -> Self {
        Self {
            user_id: String::new(),
            token: String::new(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_empty() || self.token.is_empty()
    }
}

/// Identity registry
#[derive(Clone)]
pub struct Identities {
    db: Pool<Sqlite>,
}

impl Identities {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Register a new identity and provision its profile in one transaction.
    pub async fn register(&self, username_hint: &str, display_name: &str) -> Result<(Session, Profile)> {
        let user_id = new_id();
        let token = new_id();
        let now = now_millis();

        let mut tx = self.db.begin().await.context("starting signup transaction")?;

        sqlx::query("INSERT INTO identities (id, token, created_at) VALUES (?, ?, ?)")
            .bind(&user_id)
            .bind(&token)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("inserting identity")?;

        let base = normalize_username(username_hint);
        let display_name = match display_name.trim() {
            "" => base.clone(),
            name => name.to_string(),
        };

        // A taken username is a unique violation on this statement only; the
        // transaction stays usable and the next candidate is tried.
        let mut profile = None;
        for candidate in username_candidates(&base) {
            let attempt = Profile {
                id: user_id.clone(),
                username: candidate,
                display_name: display_name.clone(),
                avatar_url: None,
                bio: None,
                created_at: now,
            };
            match ProfileDao::insert_with(&mut tx, &attempt).await {
                Ok(()) => {
                    profile = Some(attempt);
                    break;
                }
                Err(e) if e.is_unique_violation() => {
                    debug!("[Identities] username @{} taken", attempt.username);
                }
                Err(e) => return Err(e),
            }
        }
        let profile = profile.ok_or_else(|| {
            ChatError::Conflict(format!("no free username derived from {username_hint:?}"))
        })?;

        tx.commit().await.context("committing signup")?;
        info!("[Identities] registered {} as @{}", user_id, profile.username);

        Ok((Session { user_id, token }, profile))
    }

    /// Resolve a session to its identity id
    pub async fn authenticate(&self, session: &Session) -> Result<String> {
        if session.is_anonymous() {
            return Err(ChatError::Unauthenticated);
        }
        let row = sqlx::query("SELECT token FROM identities WHERE id = ?")
            .bind(&session.user_id)
            .fetch_optional(&self.db)
            .await
            .context("authenticating session")?;
        match row {
            Some(row) if row.get::<String, _>("token") == session.token => {
                Ok(session.user_id.clone())
            }
            _ => {
                warn!("[Identities] rejected session for {}", session.user_id);
                Err(ChatError::Unauthenticated)
            }
        }
    }

    /// Rotate the token so the given session stops authenticating.
    pub async fn sign_out(&self, session: &Session) -> Result<()> {
        let user_id = self.authenticate(session).await?;
        sqlx::query("UPDATE identities SET token = ? WHERE id = ?")
            .bind(new_id())
            .bind(&user_id)
            .execute(&self.db)
            .await
            .context("rotating token")?;
        info!("[Identities] signed out {}", user_id);
        Ok(())
    }

    /// Issue a fresh session for an existing identity (e.g. after sign-out).
    pub async fn sign_in(&self, user_id: &str) -> Result<Session> {
        let token = new_id();
        let res = sqlx::query("UPDATE identities SET token = ? WHERE id = ?")
            .bind(&token)
            .bind(user_id)
            .execute(&self.db)
            .await
            .context("issuing token")?;
        if res.rows_affected() == 0 {
            return Err(ChatError::NotFound(format!("identity {user_id}")));
        }
        Ok(Session {
            user_id: user_id.to_string(),
            token,
        })
    }

    /// Remove the identity; its profile, edges, conversations, messages and
    /// reactions go with it.
    pub async fn delete_identity(&self, session: &Session) -> Result<()> {
        let user_id = self.authenticate(session).await?;
        sqlx::query("DELETE FROM identities WHERE id = ?")
            .bind(&user_id)
            .execute(&self.db)
            .await
            .context("deleting identity")?;
        info!("[Identities] deleted {}", user_id);
        Ok(())
    }
}

fn username_candidates(base: &str) -> impl Iterator<Item = String> + '_ {
    let numbered = (1..=USERNAME_ATTEMPTS).map(move |n| {
        if n == 1 {
            base.to_string()
        } else {
            with_suffix(base, &n.to_string())
        }
    });
    let random = std::iter::once_with(move || {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        with_suffix(base, &suffix[..8])
    });
    numbered.chain(random)
}

fn with_suffix(base: &str, suffix: &str) -> String {
    let keep = USERNAME_MAX_LEN.saturating_sub(suffix.len() + 1).min(base.len());
    format!("{}_{}", &base[..keep], suffix)
}
