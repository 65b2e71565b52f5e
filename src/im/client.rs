//! Chat client
//!
//! Wires the pool, change feed, object store and every service together, and
//! forwards live changes to registered listeners on background tasks.

use std::sync::Arc;

use sqlx::{Pool, Sqlite};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::im::config::ChatConfig;
use crate::im::conversation::{ConversationDao, ConversationService};
use crate::im::db;
use crate::im::error::Result;
use crate::im::feed::{ChangeFeed, ChangeOp, FeedFilter, Record};
use crate::im::follow::{FollowDao, FollowListener, RelationshipGate};
use crate::im::message::{MessageDao, MessageListener, MessageLog};
use crate::im::profile::{ProfileDao, ProfileService};
use crate::im::reaction::{ReactionDao, ReactionOverlay};
use crate::im::session::{Identities, Session};
use crate::im::storage::{LocalObjectStore, ObjectStore};

#[derive(Clone)]
pub struct ChatClient {
    pub config: Arc<ChatConfig>,
    db: Pool<Sqlite>,
    feed: ChangeFeed,
    pub identities: Identities,
    pub profiles: ProfileService,
    pub follows: RelationshipGate,
    pub conversations: ConversationService,
    pub messages: MessageLog,
    pub reactions: ReactionOverlay,
}

impl ChatClient {
    /// Open the database (running migrations) and build every service.
    pub async fn connect(config: ChatConfig) -> Result<Self> {
        let pool = db::open(&config).await?;
        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(
            config.media_root.clone(),
            config.media_base_url.clone(),
        ));
        Ok(Self::with_store(config, pool, store))
    }

    /// Build the client over an existing pool and object store.
    pub fn with_store(config: ChatConfig, pool: Pool<Sqlite>, store: Arc<dyn ObjectStore>) -> Self {
        let config = Arc::new(config);
        let feed = ChangeFeed::new(config.feed_capacity);
        let identities = Identities::new(pool.clone());

        let profile_dao = ProfileDao::new(pool.clone());
        let follow_dao = FollowDao::new(pool.clone());
        let message_dao = MessageDao::new(pool.clone());

        let profiles = ProfileService::new(
            config.clone(),
            identities.clone(),
            profile_dao.clone(),
            store.clone(),
        );
        let conversations = ConversationService::new(
            identities.clone(),
            ConversationDao::new(pool.clone()),
            follow_dao.clone(),
            message_dao.clone(),
        );
        let messages = MessageLog::new(
            config.clone(),
            identities.clone(),
            conversations.clone(),
            message_dao.clone(),
            store,
            feed.clone(),
        );
        let reactions = ReactionOverlay::new(
            identities.clone(),
            conversations.clone(),
            message_dao,
            ReactionDao::new(pool.clone()),
            feed.clone(),
        );
        let follows = RelationshipGate::new(
            config.clone(),
            identities.clone(),
            follow_dao,
            profile_dao,
            feed.clone(),
        );

        info!("[Client] ready ({})", config.db_url);
        Self {
            config,
            db: pool,
            feed,
            identities,
            profiles,
            follows,
            conversations,
            messages,
            reactions,
        }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.db
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Forward one conversation's live messages and reactions to `listener`
    /// until the feed closes or the task is aborted.
    pub async fn spawn_message_pump(
        &self,
        session: &Session,
        conversation_id: &str,
        listener: Arc<dyn MessageListener>,
    ) -> Result<JoinHandle<()>> {
        let mut subscription = self.messages.subscribe(session, conversation_id).await?;
        let conversation_id = conversation_id.to_string();

        Ok(tokio::spawn(async move {
            info!("[Client] message pump started for {}", conversation_id);
            while let Some(event) = subscription.next().await {
                match (event.op, event.record) {
                    (ChangeOp::Insert, Record::Message(message)) => {
                        listener.on_new_message(message).await
                    }
                    (ChangeOp::Insert, Record::Reaction {
                        conversation_id,
                        reaction,
                    }) => listener.on_reaction_added(conversation_id, reaction).await,
                    (ChangeOp::Delete, Record::Reaction {
                        conversation_id,
                        reaction,
                    }) => listener.on_reaction_removed(conversation_id, reaction).await,
                    (op, _) => debug!("[Client] message pump ignored {:?}", op),
                }
            }
            info!("[Client] message pump for {} stopped", conversation_id);
        }))
    }

    /// Forward follow-edge changes involving the session identity to `listener`.
    pub async fn spawn_follow_pump(
        &self,
        session: &Session,
        listener: Arc<dyn FollowListener>,
    ) -> Result<JoinHandle<()>> {
        let user_id = self.identities.authenticate(session).await?;
        let mut subscription = self.feed.subscribe(FeedFilter::User(user_id.clone()));

        Ok(tokio::spawn(async move {
            info!("[Client] follow pump started for {}", user_id);
            while let Some(event) = subscription.next().await {
                let Record::FollowEdge(edge) = event.record else {
                    continue;
                };
                match event.op {
                    ChangeOp::Insert => listener.on_follow_requested(edge).await,
                    ChangeOp::Update => listener.on_follow_resolved(edge).await,
                    ChangeOp::Delete => listener.on_follow_cancelled(edge).await,
                }
            }
            info!("[Client] follow pump for {} stopped", user_id);
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::im::follow::{Decision, FollowEdge, FollowListener, FollowStatus};
    use crate::im::message::{Message, MessageListener};
    use crate::im::reaction::Reaction;
    use crate::im::testing::{connect_pair, test_client};

    struct Forward(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl MessageListener for Forward {
        async fn on_new_message(&self, message: Message) {
            let _ = self.0.send(format!("msg:{}", message.content));
        }

        async fn on_reaction_added(&self, _conversation_id: String, reaction: Reaction) {
            let _ = self.0.send(format!("react:{}", reaction.emoji));
        }
    }

    #[async_trait]
    impl FollowListener for Forward {
        async fn on_follow_requested(&self, edge: FollowEdge) {
            let _ = self.0.send(format!("requested:{}", edge.status));
        }

        async fn on_follow_resolved(&self, edge: FollowEdge) {
            let _ = self.0.send(format!("resolved:{}", edge.status));
        }
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("listener called in time")
            .expect("pump alive")
    }

    #[tokio::test]
    async fn message_pump_forwards_messages_and_reactions() {
        let client = test_client().await;
        let (a, b, conv) = connect_pair(&client, "ada", "bert").await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pump = client
            .spawn_message_pump(&b, &conv.id, Arc::new(Forward(tx)))
            .await
            .unwrap();

        let msg = client
            .messages
            .send(&a, &conv.id, Some("ping"), None)
            .await
            .unwrap();
        client.reactions.toggle(&a, &msg.id, "🏓", &[]).await.unwrap();

        assert_eq!(recv(&mut rx).await, "msg:ping");
        assert_eq!(recv(&mut rx).await, "react:🏓");
        pump.abort();
    }

    #[tokio::test]
    async fn follow_pump_sees_both_sides_of_a_request() {
        let client = test_client().await;
        let (a, _) = client.identities.register("ada", "Ada").await.unwrap();
        let (b, _) = client.identities.register("bert", "Bert").await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pump = client
            .spawn_follow_pump(&b, Arc::new(Forward(tx)))
            .await
            .unwrap();

        let edge = client.follows.request_follow(&a, &b.user_id).await.unwrap();
        client
            .follows
            .respond_to_follow(&b, &edge.id, Decision::Reject)
            .await
            .unwrap();

        assert_eq!(recv(&mut rx).await, format!("requested:{}", FollowStatus::Pending));
        assert_eq!(recv(&mut rx).await, "resolved:rejected");
        pump.abort();
    }
}
