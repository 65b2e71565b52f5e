//! Relationship gate
//!
//! Owns the follow ledger and answers the single authorization question the
//! rest of the crate asks: may these two identities talk?

use std::sync::Arc;

use tracing::{info, warn};

use crate::im::config::ChatConfig;
use crate::im::conversation::dao::ConversationDao;
use crate::im::error::{ChatError, DbResultExt, Result};
use crate::im::feed::{ChangeEvent, ChangeFeed, ChangeOp, Record};
use crate::im::follow::dao::FollowDao;
use crate::im::follow::models::{Decision, FollowEdge, FollowResponse, FollowStatus, Relationship};
use crate::im::message::dao::{MessageDao, NewMessage};
use crate::im::message::models::MessageKind;
use crate::im::profile::dao::ProfileDao;
use crate::im::session::{Identities, Session};

#[derive(Clone)]
pub struct RelationshipGate {
    config: Arc<ChatConfig>,
    identities: Identities,
    dao: FollowDao,
    profiles: ProfileDao,
    feed: ChangeFeed,
}

impl RelationshipGate {
    pub fn new(
        config: Arc<ChatConfig>,
        identities: Identities,
        dao: FollowDao,
        profiles: ProfileDao,
        feed: ChangeFeed,
    ) -> Self {
        Self {
            config,
            identities,
            dao,
            profiles,
            feed,
        }
    }

    /// Ask to follow `followee_id`. At most one edge per ordered pair: a second
    /// request (including one after a rejection) fails with `AlreadyExists`.
    pub async fn request_follow(&self, session: &Session, followee_id: &str) -> Result<FollowEdge> {
        let follower_id = self.identities.authenticate(session).await?;

        if follower_id == followee_id && !self.config.allow_self_follow {
            return Err(ChatError::Validation("cannot follow yourself".into()));
        }
        if self.profiles.get(followee_id).await?.is_none() {
            return Err(ChatError::NotFound(format!("profile {followee_id}")));
        }
        if let Some(existing) = self.dao.find(&follower_id, followee_id).await? {
            return Err(ChatError::AlreadyExists(format!(
                "follow request {} ({})",
                existing.id, existing.status
            )));
        }

        // A concurrent duplicate loses on the unique key and is reported the
        // same way as the pre-check above.
        let edge = match self.dao.insert_pending(&follower_id, followee_id).await {
            Ok(edge) => edge,
            Err(e) if e.is_unique_violation() => {
                return Err(ChatError::AlreadyExists(format!(
                    "follow request {follower_id} -> {followee_id}"
                )));
            }
            Err(e) => return Err(e),
        };

        self.feed
            .publish(ChangeEvent::new(ChangeOp::Insert, Record::FollowEdge(edge.clone())));
        Ok(edge)
    }

    /// Accept or reject a pending request addressed to the caller.
    ///
    /// Accepting materializes the pair's conversation and appends the system
    /// welcome message to it. The status change, the conversation and the
    /// welcome message commit together or not at all; events go out after
    /// the commit.
    pub async fn respond_to_follow(
        &self,
        session: &Session,
        edge_id: &str,
        decision: Decision,
    ) -> Result<FollowResponse> {
        let user_id = self.identities.authenticate(session).await?;
        let welcome_text = self.config.welcome_message.trim();
        if decision == Decision::Accept && welcome_text.is_empty() {
            return Err(ChatError::Validation("welcome message is empty".into()));
        }

        let mut tx = self.dao.begin().await?;
        if !FollowDao::resolve_with(&mut tx, edge_id, &user_id, decision.target_status()).await? {
            drop(tx);
            return Err(match self.dao.get(edge_id).await? {
                None => ChatError::NotFound(format!("follow request {edge_id}")),
                Some(edge) if edge.followee_id != user_id => {
                    warn!("[FollowService] {} tried to answer {}", user_id, edge_id);
                    ChatError::Forbidden("only the followee may answer a follow request".into())
                }
                Some(edge) => ChatError::AlreadyResolved(format!(
                    "follow request {} is {}",
                    edge.id, edge.status
                )),
            });
        }
        let edge = FollowDao::get_with(&mut tx, edge_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("follow request {edge_id}")))?;

        // The edge update holds the write lock until commit, so no other
        // writer can create the pair's conversation in between.
        let (conversation, welcome) = match decision {
            Decision::Reject => (None, None),
            Decision::Accept => {
                let conversation =
                    match ConversationDao::find_between_with(&mut tx, &edge.follower_id, &edge.followee_id)
                        .await?
                    {
                        Some(existing) => existing,
                        None => {
                            ConversationDao::insert_with(&mut tx, &edge.follower_id, &edge.followee_id)
                                .await?
                        }
                    };
                let welcome = MessageDao::append_with(
                    &mut tx,
                    NewMessage {
                        conversation_id: &conversation.id,
                        sender_id: &user_id,
                        kind: MessageKind::System,
                        content: welcome_text,
                        media_url: None,
                    },
                )
                .await?;
                (Some(conversation), Some(welcome))
            }
        };
        tx.commit().await.context("committing follow response")?;

        info!(
            "[FollowService] {} -> {} {}",
            edge.follower_id, edge.followee_id, edge.status
        );
        self.feed
            .publish(ChangeEvent::new(ChangeOp::Update, Record::FollowEdge(edge.clone())));
        if let Some(welcome) = &welcome {
            self.feed
                .publish(ChangeEvent::new(ChangeOp::Insert, Record::Message(welcome.clone())));
        }

        Ok(FollowResponse {
            edge,
            conversation,
            welcome,
        })
    }

    /// Withdraw a request the caller sent that is still pending.
    pub async fn cancel_request(&self, session: &Session, edge_id: &str) -> Result<FollowEdge> {
        let user_id = self.identities.authenticate(session).await?;
        let edge = self
            .dao
            .get(edge_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("follow request {edge_id}")))?;
        if edge.follower_id != user_id {
            return Err(ChatError::Forbidden(
                "only the follower may withdraw a request".into(),
            ));
        }
        if !self.dao.delete_pending(edge_id, &user_id).await? {
            return Err(ChatError::AlreadyResolved(format!(
                "follow request {edge_id} is no longer pending"
            )));
        }
        self.feed
            .publish(ChangeEvent::new(ChangeOp::Delete, Record::FollowEdge(edge.clone())));
        Ok(edge)
    }

    /// The messaging eligibility predicate
    pub async fn is_connected(&self, a: &str, b: &str) -> Result<bool> {
        self.dao.is_connected(a, b).await
    }

    pub async fn relationship(&self, session: &Session, other_id: &str) -> Result<Relationship> {
        let user_id = self.identities.authenticate(session).await?;
        Ok(Relationship {
            outgoing: self.dao.find(&user_id, other_id).await?,
            incoming: self.dao.find(other_id, &user_id).await?,
        })
    }

    /// Pending requests waiting for the caller's answer
    pub async fn incoming_requests(&self, session: &Session) -> Result<Vec<FollowEdge>> {
        let user_id = self.identities.authenticate(session).await?;
        self.dao.list_incoming(&user_id, FollowStatus::Pending).await
    }

    pub async fn outgoing_requests(&self, session: &Session) -> Result<Vec<FollowEdge>> {
        let user_id = self.identities.authenticate(session).await?;
        self.dao.list_outgoing(&user_id).await
    }

    pub async fn connections(&self, session: &Session) -> Result<Vec<String>> {
        let user_id = self.identities.authenticate(session).await?;
        self.dao.connections(&user_id).await
    }
}

#[cfg(test)]
mod tests {
    use crate::im::error::ChatError;
    use crate::im::feed::{ChangeOp, FeedFilter, Record};
    use crate::im::follow::models::{Decision, FollowStatus};
    use crate::im::message::models::MessageKind;
    use crate::im::testing::test_client;

    #[tokio::test]
    async fn request_lifecycle_is_published_to_both_ends() {
        let client = test_client().await;
        let (a, _) = client.identities.register("ada", "Ada").await.unwrap();
        let (b, _) = client.identities.register("bert", "Bert").await.unwrap();
        let mut follower_feed = client.feed().subscribe(FeedFilter::User(a.user_id.clone()));

        let edge = client.follows.request_follow(&a, &b.user_id).await.unwrap();
        assert_eq!(client.follows.outgoing_requests(&a).await.unwrap(), vec![edge.clone()]);
        assert!(client.follows.incoming_requests(&a).await.unwrap().is_empty());

        client
            .follows
            .respond_to_follow(&b, &edge.id, Decision::Accept)
            .await
            .unwrap();

        let ops: Vec<(ChangeOp, FollowStatus)> = std::iter::from_fn(|| follower_feed.try_next())
            .filter_map(|event| match event.record {
                Record::FollowEdge(edge) => Some((event.op, edge.status)),
                _ => None,
            })
            .collect();
        assert_eq!(
            ops,
            vec![
                (ChangeOp::Insert, FollowStatus::Pending),
                (ChangeOp::Update, FollowStatus::Accepted),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_followee_is_not_found() {
        let client = test_client().await;
        let (a, _) = client.identities.register("ada", "Ada").await.unwrap();
        let err = client
            .follows
            .request_follow(&a, "nobody")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn discovery_hides_people_already_asked() {
        let client = test_client().await;
        let (a, _) = client.identities.register("ada", "Ada").await.unwrap();
        let (b, _) = client.identities.register("bert", "Bert").await.unwrap();
        let (c, _) = client.identities.register("cleo", "Cleo").await.unwrap();

        let ids = |profiles: Vec<crate::im::profile::Profile>| -> Vec<String> {
            let mut ids: Vec<String> = profiles.into_iter().map(|p| p.id).collect();
            ids.sort();
            ids
        };
        let mut expected = vec![b.user_id.clone(), c.user_id.clone()];
        expected.sort();
        assert_eq!(ids(client.profiles.discover(&a, 10).await.unwrap()), expected);

        client.follows.request_follow(&a, &b.user_id).await.unwrap();
        assert_eq!(
            ids(client.profiles.discover(&a, 10).await.unwrap()),
            vec![c.user_id.clone()]
        );
        // the followee still sees the follower
        assert!(ids(client.profiles.discover(&b, 10).await.unwrap()).contains(&a.user_id));
    }

    #[tokio::test]
    async fn failed_accept_leaves_the_request_pending_and_retryable() {
        let client = test_client().await;
        let (a, _) = client.identities.register("ada", "Ada").await.unwrap();
        let (b, _) = client.identities.register("bert", "Bert").await.unwrap();
        let edge = client.follows.request_follow(&a, &b.user_id).await.unwrap();

        sqlx::query(
            "CREATE TRIGGER refuse_messages BEFORE INSERT ON messages \
             BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .execute(client.pool())
        .await
        .unwrap();

        let err = client
            .follows
            .respond_to_follow(&b, &edge.id, Decision::Accept)
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{err}");
        let stored = client.follows.dao.get(&edge.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FollowStatus::Pending);
        assert!(!client.follows.is_connected(&a.user_id, &b.user_id).await.unwrap());
        let conversations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
            .fetch_one(client.pool())
            .await
            .unwrap();
        assert_eq!(conversations, 0);

        sqlx::query("DROP TRIGGER refuse_messages")
            .execute(client.pool())
            .await
            .unwrap();
        let response = client
            .follows
            .respond_to_follow(&b, &edge.id, Decision::Accept)
            .await
            .unwrap();
        let conversation = response.conversation.unwrap();
        let history = client
            .messages
            .list_since(&a, &conversation.id, None)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, MessageKind::System);
    }
}
