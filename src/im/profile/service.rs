//! Profile service: reads, owner-only edits, avatar upload, discovery

use std::sync::Arc;

use tracing::{info, warn};

use crate::im::config::ChatConfig;
use crate::im::error::{ChatError, Result};
use crate::im::profile::dao::ProfileDao;
use crate::im::profile::models::{validate_username, Profile, ProfileUpdate, BIO_MAX_CHARS};
use crate::im::session::{Identities, Session};
use crate::im::storage::{avatar_path, ObjectStore};

const MAX_PAGE: i64 = 100;

#[derive(Clone)]
pub struct ProfileService {
    config: Arc<ChatConfig>,
    identities: Identities,
    dao: ProfileDao,
    store: Arc<dyn ObjectStore>,
}

impl ProfileService {
    pub fn new(
        config: Arc<ChatConfig>,
        identities: Identities,
        dao: ProfileDao,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            identities,
            dao,
            store,
        }
    }

    pub async fn get_profile(&self, id: &str) -> Result<Profile> {
        self.dao
            .get(id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("profile {id}")))
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Profile> {
        let username = username.trim().trim_start_matches('@').to_lowercase();
        self.dao
            .get_by_username(&username)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("profile @{username}")))
    }

    /// The session's own profile
    pub async fn me(&self, session: &Session) -> Result<Profile> {
        let user_id = self.identities.authenticate(session).await?;
        self.get_profile(&user_id).await
    }

    /// Edit the caller's own profile. There is no way to address someone
    /// else's profile through this call.
    pub async fn update_profile(&self, session: &Session, update: ProfileUpdate) -> Result<Profile> {
        let user_id = self.identities.authenticate(session).await?;

        if let Some(name) = &update.display_name {
            if name.trim().is_empty() {
                return Err(ChatError::Validation("display name cannot be empty".into()));
            }
        }
        if let Some(bio) = &update.bio {
            if bio.chars().count() > BIO_MAX_CHARS {
                return Err(ChatError::Validation(format!(
                    "bio is limited to {BIO_MAX_CHARS} characters"
                )));
            }
        }

        self.dao.update(&user_id, &update).await?;
        self.get_profile(&user_id).await
    }

    pub async fn set_username(&self, session: &Session, username: &str) -> Result<Profile> {
        let user_id = self.identities.authenticate(session).await?;
        let username = username.trim().to_lowercase();
        validate_username(&username)?;

        match self.dao.set_username(&user_id, &username).await {
            Ok(_) => {}
            Err(e) if e.is_unique_violation() => {
                return Err(ChatError::AlreadyExists(format!("username @{username}")));
            }
            Err(e) => return Err(e),
        }
        info!("[ProfileService] {} is now @{}", user_id, username);
        self.get_profile(&user_id).await
    }

    /// Store a new avatar under the caller's namespace and point the profile
    /// at it; the previous avatar object is removed afterwards.
    pub async fn upload_avatar(
        &self,
        session: &Session,
        filename: &str,
        bytes: &[u8],
    ) -> Result<Profile> {
        let user_id = self.identities.authenticate(session).await?;
        if bytes.is_empty() {
            return Err(ChatError::Validation("avatar file is empty".into()));
        }
        if bytes.len() > self.config.max_upload_bytes {
            return Err(ChatError::Validation(format!(
                "avatar exceeds {} bytes",
                self.config.max_upload_bytes
            )));
        }

        let previous = self.get_profile(&user_id).await?.avatar_url;
        let media = self
            .store
            .upload(&avatar_path(&user_id, filename), bytes)
            .await?;

        let update = ProfileUpdate {
            avatar_url: Some(media.url.clone()),
            ..Default::default()
        };
        if let Err(e) = self.dao.update(&user_id, &update).await {
            if let Err(cleanup) = self.store.delete(&media.path).await {
                warn!("[ProfileService] orphaned avatar upload {}: {}", media.path, cleanup);
            }
            return Err(e);
        }

        if let Some(old_path) = previous.as_deref().and_then(|u| self.store.path_for_url(u)) {
            if let Err(e) = self.store.delete(&old_path).await {
                warn!("[ProfileService] could not remove old avatar {}: {}", old_path, e);
            }
        }
        self.get_profile(&user_id).await
    }

    pub async fn search(&self, query: &str, limit: i64) -> Result<Vec<Profile>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        self.dao.search(query, limit.clamp(1, MAX_PAGE)).await
    }

    /// Discovery feed: people the caller has not asked to follow yet
    pub async fn discover(&self, session: &Session, limit: i64) -> Result<Vec<Profile>> {
        let user_id = self.identities.authenticate(session).await?;
        self.dao.discover(&user_id, limit.clamp(1, MAX_PAGE)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::db::create_memory_pool;
    use crate::im::storage::LocalObjectStore;

    async fn setup(dir: &std::path::Path) -> (ProfileService, Identities) {
        let pool = create_memory_pool().await.unwrap();
        let identities = Identities::new(pool.clone());
        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(dir, "/media"));
        let service = ProfileService::new(
            Arc::new(ChatConfig::new("sqlite::memory:")),
            identities.clone(),
            ProfileDao::new(pool),
            store,
        );
        (service, identities)
    }

    #[tokio::test]
    async fn owner_updates_and_clears_fields() {
        let dir = tempfile::tempdir().unwrap();
        let (service, identities) = setup(dir.path()).await;
        let (session, _) = identities.register("dana", "Dana").await.unwrap();

        let updated = service
            .update_profile(
                &session,
                ProfileUpdate {
                    bio: Some("hello there".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.bio.as_deref(), Some("hello there"));
        assert_eq!(updated.display_name, "Dana");

        let cleared = service
            .update_profile(
                &session,
                ProfileUpdate {
                    bio: Some(String::new()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cleared.bio, None);

        let err = service
            .update_profile(&Session::anonymous(), ProfileUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Unauthenticated));
    }

    #[tokio::test]
    async fn username_changes_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let (service, identities) = setup(dir.path()).await;
        let (a, _) = identities.register("erin", "").await.unwrap();
        let (b, _) = identities.register("frank", "").await.unwrap();

        let err = service.set_username(&b, "erin").await.unwrap_err();
        assert!(matches!(err, ChatError::AlreadyExists(_)));
        let err = service.set_username(&b, "x").await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        service.set_username(&a, "erin_2").await.unwrap();
        assert_eq!(service.get_by_username("@Erin_2").await.unwrap().id, a.user_id);
    }

    #[tokio::test]
    async fn avatar_upload_replaces_previous_object() {
        let dir = tempfile::tempdir().unwrap();
        let (service, identities) = setup(dir.path()).await;
        let (session, _) = identities.register("gina", "").await.unwrap();

        let first = service.upload_avatar(&session, "a.png", b"one").await.unwrap();
        let first_url = first.avatar_url.clone().unwrap();
        assert!(first_url.starts_with(&format!("/media/avatars/{}/", session.user_id)));

        let second = service.upload_avatar(&session, "b.png", b"two").await.unwrap();
        assert_ne!(second.avatar_url, first.avatar_url);

        let old_path = dir.path().join(first_url.trim_start_matches("/media/"));
        assert!(!old_path.exists());

        let err = service.upload_avatar(&session, "c.png", b"").await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test]
    async fn search_matches_username_and_display_name() {
        let dir = tempfile::tempdir().unwrap();
        let (service, identities) = setup(dir.path()).await;
        identities.register("harriet", "Harriet Jones").await.unwrap();
        identities.register("ivan", "Ivan 100%").await.unwrap();

        let hits = service.search("JONES", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].username, "harriet");

        let hits = service.search("100%", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(service.search("  ", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_avatar_save_removes_the_upload() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_memory_pool().await.unwrap();
        let identities = Identities::new(pool.clone());
        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(dir.path(), "/media"));
        let service = ProfileService::new(
            Arc::new(ChatConfig::new("sqlite::memory:")),
            identities.clone(),
            ProfileDao::new(pool.clone()),
            store,
        );
        let (session, _) = identities.register("jules", "").await.unwrap();
        sqlx::query(
            "CREATE TRIGGER freeze_profiles BEFORE UPDATE ON profiles \
             BEGIN SELECT RAISE(ABORT, 'read only'); END",
        )
        .execute(&pool)
        .await
        .unwrap();

        let err = service.upload_avatar(&session, "a.png", b"one").await.unwrap_err();
        assert!(err.is_retryable(), "{err}");
        let avatars = dir.path().join("avatars").join(&session.user_id);
        let leftover = std::fs::read_dir(&avatars).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftover, 0);
        assert_eq!(service.get_profile(&session.user_id).await.unwrap().avatar_url, None);
    }
}
