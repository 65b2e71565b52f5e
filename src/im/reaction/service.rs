//! Reaction overlay service
//!
//! Toggle intent comes from what the caller already knows; the unique
//! (message, user, emoji) key settles races between devices.

use tracing::debug;

use crate::im::conflict::{resolve_on_conflict, Resolved};
use crate::im::conversation::service::ConversationService;
use crate::im::error::{ChatError, Result};
use crate::im::feed::{ChangeEvent, ChangeFeed, ChangeOp, Record};
use crate::im::message::dao::MessageDao;
use crate::im::message::models::Message;
use crate::im::reaction::dao::ReactionDao;
use crate::im::reaction::models::{count_by_emoji, validate_emoji, EmojiCount, Reaction, ToggleOutcome};
use crate::im::session::{Identities, Session};

#[derive(Clone)]
pub struct ReactionOverlay {
    identities: Identities,
    conversations: ConversationService,
    messages: MessageDao,
    dao: ReactionDao,
    feed: ChangeFeed,
}

impl ReactionOverlay {
    pub fn new(
        identities: Identities,
        conversations: ConversationService,
        messages: MessageDao,
        dao: ReactionDao,
        feed: ChangeFeed,
    ) -> Self {
        Self {
            identities,
            conversations,
            messages,
            dao,
            feed,
        }
    }

    /// Flip the caller's `emoji` on a message.
    ///
    /// `known` is the caller's local view of reactions; if it holds the
    /// caller's row for this emoji the row is removed, otherwise one is added.
    pub async fn toggle(
        &self,
        session: &Session,
        message_id: &str,
        emoji: &str,
        known: &[Reaction],
    ) -> Result<ToggleOutcome> {
        validate_emoji(emoji)?;
        let user_id = self.identities.authenticate(session).await?;
        let message = self.authorized_message(&user_id, message_id).await?;

        if let Some(mine) = known.iter().find(|r| r.is(message_id, &user_id, emoji)) {
            if self.dao.delete(&mine.id, &user_id).await? {
                self.publish(ChangeOp::Delete, &message, mine.clone());
            } else {
                debug!("[ReactionService] {} already gone", mine.id);
            }
            return Ok(ToggleOutcome::Removed(mine.clone()));
        }

        let resolved = resolve_on_conflict(
            "reaction add",
            || self.dao.insert(message_id, &user_id, emoji),
            || self.dao.find(message_id, &user_id, emoji),
        )
        .await?;
        Ok(match resolved {
            Resolved::Written(reaction) => {
                self.publish(ChangeOp::Insert, &message, reaction.clone());
                ToggleOutcome::Added(reaction)
            }
            Resolved::Existing(reaction) => ToggleOutcome::AlreadyApplied(reaction),
        })
    }

    /// [`ReactionOverlay::toggle`] with the caller's persisted reactions as
    /// the known set.
    pub async fn toggle_persisted(
        &self,
        session: &Session,
        message_id: &str,
        emoji: &str,
    ) -> Result<ToggleOutcome> {
        let user_id = self.identities.authenticate(session).await?;
        let known = self.dao.list_by_user(message_id, &user_id).await?;
        self.toggle(session, message_id, emoji, &known).await
    }

    pub async fn counts_by_emoji(&self, session: &Session, message_id: &str) -> Result<Vec<EmojiCount>> {
        let user_id = self.identities.authenticate(session).await?;
        self.authorized_message(&user_id, message_id).await?;
        let reactions = self.dao.list_for_message(message_id).await?;
        Ok(count_by_emoji(&reactions, &user_id))
    }

    pub async fn list_for_message(&self, session: &Session, message_id: &str) -> Result<Vec<Reaction>> {
        let user_id = self.identities.authenticate(session).await?;
        self.authorized_message(&user_id, message_id).await?;
        self.dao.list_for_message(message_id).await
    }

    /// Bulk load for a page of messages; ids outside the conversation are ignored.
    pub async fn list_for_messages(
        &self,
        session: &Session,
        conversation_id: &str,
        message_ids: &[String],
    ) -> Result<Vec<Reaction>> {
        let user_id = self.identities.authenticate(session).await?;
        self.conversations.authorize(&user_id, conversation_id).await?;
        self.dao.list_for_messages(conversation_id, message_ids).await
    }

    pub async fn list_for_conversation(
        &self,
        session: &Session,
        conversation_id: &str,
    ) -> Result<Vec<Reaction>> {
        let user_id = self.identities.authenticate(session).await?;
        self.conversations.authorize(&user_id, conversation_id).await?;
        self.dao.list_for_conversation(conversation_id).await
    }

    async fn authorized_message(&self, user_id: &str, message_id: &str) -> Result<Message> {
        let message = self
            .messages
            .get(message_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("message {message_id}")))?;
        self.conversations
            .authorize(user_id, &message.conversation_id)
            .await?;
        Ok(message)
    }

    fn publish(&self, op: ChangeOp, message: &Message, reaction: Reaction) {
        self.feed.publish(ChangeEvent::new(
            op,
            Record::Reaction {
                conversation_id: message.conversation_id.clone(),
                reaction,
            },
        ));
    }
}

#[cfg(test)]
mod tests {
    use crate::im::error::ChatError;
    use crate::im::feed::{ChangeOp, Record};
    use crate::im::reaction::models::ToggleOutcome;
    use crate::im::testing::{connect_pair, test_client};

    #[tokio::test]
    async fn toggle_twice_returns_to_empty() {
        let client = test_client().await;
        let (a, _, conv) = connect_pair(&client, "ada", "bert").await;
        let msg = client
            .messages
            .send(&a, &conv.id, Some("react to me"), None)
            .await
            .unwrap();

        let added = client
            .reactions
            .toggle(&a, &msg.id, "👍", &[])
            .await
            .unwrap();
        assert!(matches!(added, ToggleOutcome::Added(_)));

        let known = vec![added.reaction().clone()];
        let removed = client
            .reactions
            .toggle(&a, &msg.id, "👍", &known)
            .await
            .unwrap();
        assert!(matches!(removed, ToggleOutcome::Removed(_)));
        assert!(client
            .reactions
            .list_for_message(&a, &msg.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn different_emoji_coexist_and_duplicates_are_absorbed() {
        let client = test_client().await;
        let (a, b, conv) = connect_pair(&client, "ada", "bert").await;
        let msg = client
            .messages
            .send(&b, &conv.id, Some("hi"), None)
            .await
            .unwrap();

        client.reactions.toggle(&a, &msg.id, "👍", &[]).await.unwrap();
        client.reactions.toggle(&a, &msg.id, "🎉", &[]).await.unwrap();
        // a second device with a stale view adds the same emoji again
        let dup = client.reactions.toggle(&a, &msg.id, "👍", &[]).await.unwrap();
        assert!(matches!(dup, ToggleOutcome::AlreadyApplied(_)));
        client.reactions.toggle(&b, &msg.id, "👍", &[]).await.unwrap();

        let counts = client.reactions.counts_by_emoji(&b, &msg.id).await.unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].emoji, "👍");
        assert_eq!(counts[0].count, 2);
        assert!(counts[0].reacted_by_viewer);
        assert_eq!(counts[1].emoji, "🎉");
        assert!(!counts[1].reacted_by_viewer);
    }

    #[tokio::test]
    async fn persisted_toggle_and_events() {
        let client = test_client().await;
        let (a, b, conv) = connect_pair(&client, "ada", "bert").await;
        let msg = client
            .messages
            .send(&a, &conv.id, Some("hi"), None)
            .await
            .unwrap();
        let mut sub = client.messages.subscribe(&b, &conv.id).await.unwrap();

        assert!(client
            .reactions
            .toggle_persisted(&a, &msg.id, "❤️")
            .await
            .unwrap()
            .is_present());
        assert!(!client
            .reactions
            .toggle_persisted(&a, &msg.id, "❤️")
            .await
            .unwrap()
            .is_present());

        let ops: Vec<ChangeOp> = std::iter::from_fn(|| sub.try_next())
            .map(|event| {
                assert!(matches!(event.record, Record::Reaction { .. }));
                event.op
            })
            .collect();
        assert_eq!(ops, vec![ChangeOp::Insert, ChangeOp::Delete]);
    }

    #[tokio::test]
    async fn outsiders_cannot_react() {
        let client = test_client().await;
        let (a, _, conv) = connect_pair(&client, "ada", "bert").await;
        let (eve, _) = client.identities.register("eve", "Eve").await.unwrap();
        let msg = client
            .messages
            .send(&a, &conv.id, Some("private"), None)
            .await
            .unwrap();

        let err = client
            .reactions
            .toggle(&eve, &msg.id, "👀", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));

        let err = client
            .reactions
            .toggle(&a, "missing", "👀", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));

        let err = client
            .reactions
            .toggle(&a, &msg.id, "two words", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }
}
