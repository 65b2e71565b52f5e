//! Conversation materializer
//!
//! Creates the single conversation per canonical pair and answers
//! participant/eligibility questions for the message and reaction layers.

use tracing::{debug, warn};

use crate::im::conflict::{resolve_on_conflict, Resolved};
use crate::im::conversation::dao::ConversationDao;
use crate::im::conversation::models::{Conversation, ConversationSummary};
use crate::im::error::{ChatError, Result};
use crate::im::follow::dao::FollowDao;
use crate::im::message::dao::MessageDao;
use crate::im::session::{Identities, Session};

#[derive(Clone)]
pub struct ConversationService {
    identities: Identities,
    dao: ConversationDao,
    follows: FollowDao,
    messages: MessageDao,
}

impl ConversationService {
    pub fn new(
        identities: Identities,
        dao: ConversationDao,
        follows: FollowDao,
        messages: MessageDao,
    ) -> Self {
        Self {
            identities,
            dao,
            follows,
            messages,
        }
    }

    /// Return the pair's conversation, creating it if needed.
    ///
    /// Eligibility is not checked here; callers that act on behalf of a user
    /// go through [`ConversationService::open_with`].
    pub async fn get_or_create(&self, a: &str, b: &str) -> Result<Conversation> {
        Ok(self.get_or_create_resolved(a, b).await?.into_inner())
    }

    /// Like [`ConversationService::get_or_create`] but reports whether this
    /// call wrote the row.
    pub async fn get_or_create_resolved(&self, a: &str, b: &str) -> Result<Resolved<Conversation>> {
        if let Some(existing) = self.dao.find_between(a, b).await? {
            return Ok(Resolved::Existing(existing));
        }
        let resolved = resolve_on_conflict(
            "conversation create",
            || self.dao.insert(a, b),
            || self.dao.find_between(a, b),
        )
        .await?;
        if !resolved.was_written() {
            debug!("[ConvService] reused conversation for {} / {}", a, b);
        }
        Ok(resolved)
    }

    pub async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        self.dao.get(conversation_id).await
    }

    pub async fn find_between(&self, a: &str, b: &str) -> Result<Option<Conversation>> {
        self.dao.find_between(a, b).await
    }

    /// Gated entry point: the caller must be connected to `peer_id`.
    pub async fn open_with(&self, session: &Session, peer_id: &str) -> Result<Conversation> {
        let user_id = self.identities.authenticate(session).await?;
        if !self.follows.is_connected(&user_id, peer_id).await? {
            return Err(ChatError::Forbidden(format!(
                "not connected with {peer_id}"
            )));
        }
        self.get_or_create(&user_id, peer_id).await
    }

    /// The caller's conversations, most recently active first
    pub async fn list_for(&self, session: &Session) -> Result<Vec<ConversationSummary>> {
        let user_id = self.identities.authenticate(session).await?;
        let mut summaries = Vec::new();
        for conversation in self.dao.list_for_user(&user_id).await? {
            let peer_id = conversation
                .peer_of(&user_id)
                .unwrap_or(&user_id)
                .to_string();
            let latest_message = self.messages.latest(&conversation.id).await?;
            summaries.push(ConversationSummary {
                conversation,
                peer_id,
                latest_message,
            });
        }
        summaries.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
        Ok(summaries)
    }

    /// Load the conversation and require `user_id` to be a connected
    /// participant. Checked on every read and write, not only at creation.
    pub async fn authorize(&self, user_id: &str, conversation_id: &str) -> Result<Conversation> {
        let conversation = self
            .dao
            .get(conversation_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("conversation {conversation_id}")))?;

        let Some(peer) = conversation.peer_of(user_id) else {
            warn!("[ConvService] {} is not in {}", user_id, conversation_id);
            return Err(ChatError::Forbidden("not a participant".into()));
        };
        if !self.follows.is_connected(user_id, peer).await? {
            warn!("[ConvService] {} and {} are no longer connected", user_id, peer);
            return Err(ChatError::Forbidden("participants are not connected".into()));
        }
        Ok(conversation)
    }
}
