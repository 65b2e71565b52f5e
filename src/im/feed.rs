//! Change feed: in-process publish/subscribe of committed row changes
//!
//! Writers publish after their statement commits, so each receiver observes
//! events in commit order. Subscribers filter by conversation or by user.

use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::im::follow::models::FollowEdge;
use crate::im::message::models::Message;
use crate::im::reaction::models::Reaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// The row a change refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "table", content = "row", rename_all = "snake_case")]
pub enum Record {
    Message(Message),
    /// Reactions carry their conversation so subscribers can filter without a lookup
    Reaction {
        conversation_id: String,
        reaction: Reaction,
    },
    FollowEdge(FollowEdge),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    pub record: Record,
}

impl ChangeEvent {
    pub fn new(op: ChangeOp, record: Record) -> Self {
        Self { op, record }
    }

    /// Conversation the row belongs to, if any
    pub fn conversation_id(&self) -> Option<&str> {
        match &self.record {
            Record::Message(m) => Some(&m.conversation_id),
            Record::Reaction {
                conversation_id, ..
            } => Some(conversation_id),
            Record::FollowEdge(_) => None,
        }
    }

    fn involves_user(&self, user_id: &str) -> bool {
        match &self.record {
            Record::FollowEdge(edge) => edge.follower_id == user_id || edge.followee_id == user_id,
            _ => false,
        }
    }
}

/// What a subscription hands out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Event(ChangeEvent),
    /// The receiver fell behind and this many events were dropped
    Lagged(u64),
}

/// Which events a subscription receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFilter {
    /// Message and reaction changes of one conversation
    Conversation(String),
    /// Follow-edge changes where the user is either endpoint
    User(String),
    All,
}

impl FeedFilter {
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match self {
            FeedFilter::Conversation(id) => event.conversation_id() == Some(id.as_str()),
            FeedFilter::User(id) => event.involves_user(id),
            FeedFilter::All => true,
        }
    }
}

#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Fan an event out to current subscribers; nobody listening is fine.
    pub fn publish(&self, event: ChangeEvent) {
        let receivers = self.tx.send(event).unwrap_or(0);
        debug!("[Feed] published to {} receivers", receivers);
    }

    pub fn subscribe(&self, filter: FeedFilter) -> Subscription {
        debug!("[Feed] new subscription {:?}", filter);
        Subscription {
            rx: self.tx.subscribe(),
            filter,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A filtered receiver; dropping it (or calling [`Subscription::unsubscribe`])
/// detaches it from the feed.
pub struct Subscription {
    rx: broadcast::Receiver<ChangeEvent>,
    filter: FeedFilter,
}

impl Subscription {
    pub fn filter(&self) -> &FeedFilter {
        &self.filter
    }

    /// Next matching event or lag notice, or `None` once the feed is gone.
    ///
    /// `Lagged(n)` means the receiver fell `n` events behind the channel and
    /// those events are gone; anything derived from the feed must be reloaded.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(Delivery::Event(event)),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "[Feed] subscriber {:?} lagged, {} events skipped",
                        self.filter, skipped
                    );
                    return Some(Delivery::Lagged(skipped));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`]
    pub fn try_recv(&mut self) -> Option<Delivery> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(Delivery::Event(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(
                        "[Feed] subscriber {:?} lagged, {} events skipped",
                        self.filter, skipped
                    );
                    return Some(Delivery::Lagged(skipped));
                }
                Err(_) => return None,
            }
        }
    }

    /// Next matching event, skipping lag notices. For consumers that keep no
    /// state built from earlier events.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            if let Delivery::Event(event) = self.recv().await? {
                return Some(event);
            }
        }
    }

    /// Non-blocking variant of [`Subscription::next`]
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        loop {
            if let Delivery::Event(event) = self.try_recv()? {
                return Some(event);
            }
        }
    }

    pub fn unsubscribe(self) {
        debug!("[Feed] unsubscribed {:?}", self.filter);
    }

    pub fn into_stream(self) -> impl Stream<Item = ChangeEvent> {
        stream::unfold(self, |mut sub| async move {
            let event = sub.next().await?;
            Some((event, sub))
        })
    }
}
