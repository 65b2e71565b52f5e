//! Local conversation view driven by a pure reducer
//!
//! [`reduce`] folds bulk loads and live change events into a
//! [`TimelineState`]. [`LiveTimeline`] wires it to the message log and the
//! change feed and reconciles the two by id.

use tracing::{debug, info, warn};

use crate::im::client::ChatClient;
use crate::im::error::Result;
use crate::im::feed::{ChangeEvent, ChangeOp, Delivery, Record, Subscription};
use crate::im::message::models::{Message, MessageCursor};
use crate::im::reaction::models::{count_by_emoji, EmojiCount, Reaction};
use crate::im::session::Session;

/// Ordered local view of one conversation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineState {
    pub conversation_id: String,
    /// Ascending log order, unique by id
    pub messages: Vec<Message>,
    /// Unique by id
    pub reactions: Vec<Reaction>,
}

impl TimelineState {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            ..Default::default()
        }
    }

    /// Cursor of the newest message held
    pub fn cursor(&self) -> Option<MessageCursor> {
        self.messages.last().map(Message::cursor)
    }

    pub fn reactions_for<'a>(&'a self, message_id: &'a str) -> impl Iterator<Item = &'a Reaction> {
        self.reactions.iter().filter(move |r| r.message_id == message_id)
    }

    pub fn counts_by_emoji(&self, message_id: &str, viewer_id: &str) -> Vec<EmojiCount> {
        count_by_emoji(self.reactions_for(message_id), viewer_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEvent {
    /// Result of a bulk read. Messages are merged; the reaction list is an
    /// authoritative snapshot and replaces the local one.
    Loaded {
        messages: Vec<Message>,
        reactions: Vec<Reaction>,
    },
    Change(ChangeEvent),
}

/// Fold one event into the state.
pub fn reduce(mut state: TimelineState, event: &TimelineEvent) -> TimelineState {
    match event {
        TimelineEvent::Loaded {
            messages,
            reactions,
        } => {
            for message in messages {
                insert_message(&mut state, message);
            }
            state.reactions.clear();
            for reaction in reactions {
                insert_reaction(&mut state, reaction);
            }
        }
        TimelineEvent::Change(change) => {
            if change.conversation_id() != Some(state.conversation_id.as_str()) {
                return state;
            }
            match (&change.op, &change.record) {
                (ChangeOp::Insert, Record::Message(message)) => insert_message(&mut state, message),
                (ChangeOp::Insert, Record::Reaction { reaction, .. }) => {
                    insert_reaction(&mut state, reaction)
                }
                (ChangeOp::Delete, Record::Reaction { reaction, .. }) => {
                    state.reactions.retain(|r| r.id != reaction.id)
                }
                // messages never change after insert
                _ => {}
            }
        }
    }
    state
}

fn insert_message(state: &mut TimelineState, message: &Message) {
    if message.conversation_id != state.conversation_id
        || state.messages.iter().any(|m| m.id == message.id)
    {
        return;
    }
    let cursor = message.cursor();
    let at = state.messages.partition_point(|m| m.cursor() <= cursor);
    state.messages.insert(at, message.clone());
}

fn insert_reaction(state: &mut TimelineState, reaction: &Reaction) {
    if !state.reactions.iter().any(|r| r.id == reaction.id) {
        state.reactions.push(reaction.clone());
    }
}

/// An open conversation screen: local state plus its live subscription.
///
/// If the subscription falls behind the feed, the timeline reloads from the
/// log and merges the result instead of losing the dropped events.
pub struct LiveTimeline {
    client: ChatClient,
    session: Session,
    state: TimelineState,
    subscription: Option<Subscription>,
}

impl LiveTimeline {
    /// Bulk-load, attach the live feed, then catch up on whatever was written
    /// between the load and the attach.
    pub async fn open(client: &ChatClient, session: &Session, conversation_id: &str) -> Result<Self> {
        let messages = client.messages.list_since(session, conversation_id, None).await?;
        let reactions = client
            .reactions
            .list_for_conversation(session, conversation_id)
            .await?;
        let state = reduce(
            TimelineState::new(conversation_id),
            &TimelineEvent::Loaded {
                messages,
                reactions,
            },
        );

        let subscription = client.messages.subscribe(session, conversation_id).await?;

        let missed = client
            .messages
            .list_since(session, conversation_id, state.cursor())
            .await?;
        let reactions = client
            .reactions
            .list_for_conversation(session, conversation_id)
            .await?;
        debug!("[Timeline] {} messages caught up after attach", missed.len());
        let state = reduce(
            state,
            &TimelineEvent::Loaded {
                messages: missed,
                reactions,
            },
        );

        info!(
            "[Timeline] opened {} with {} messages",
            conversation_id,
            state.messages.len()
        );
        Ok(Self {
            client: client.clone(),
            session: session.clone(),
            state,
            subscription: Some(subscription),
        })
    }

    pub fn state(&self) -> &TimelineState {
        &self.state
    }

    pub fn is_open(&self) -> bool {
        self.subscription.is_some()
    }

    /// Apply a live event. Returns false once the timeline is closed.
    pub fn apply(&mut self, event: ChangeEvent) -> bool {
        if !self.is_open() {
            debug!("[Timeline] dropped event after close");
            return false;
        }
        self.state = reduce(std::mem::take(&mut self.state), &TimelineEvent::Change(event));
        true
    }

    /// Wait for the next live event and apply it. `Ok(None)` once the
    /// timeline is closed or the feed is gone.
    pub async fn next_event(&mut self) -> Result<Option<ChangeEvent>> {
        loop {
            let Some(subscription) = self.subscription.as_mut() else {
                return Ok(None);
            };
            match subscription.recv().await {
                Some(Delivery::Event(event)) => {
                    self.apply(event.clone());
                    return Ok(Some(event));
                }
                Some(Delivery::Lagged(skipped)) => self.resync(skipped).await?,
                None => return Ok(None),
            }
        }
    }

    /// Apply every event already buffered. Returns how many live events were
    /// applied; a lag in between triggers a reload from the log.
    pub async fn drain(&mut self) -> Result<usize> {
        let mut applied = 0;
        loop {
            let Some(subscription) = self.subscription.as_mut() else {
                break;
            };
            match subscription.try_recv() {
                Some(Delivery::Event(event)) => {
                    if self.apply(event) {
                        applied += 1;
                    }
                }
                Some(Delivery::Lagged(skipped)) => self.resync(skipped).await?,
                None => break,
            }
        }
        Ok(applied)
    }

    /// Reload what the feed dropped: messages after the local cursor and a
    /// fresh reaction snapshot.
    async fn resync(&mut self, skipped: u64) -> Result<()> {
        let conversation_id = self.state.conversation_id.clone();
        warn!(
            "[Timeline] {} missed {} feed events, reloading",
            conversation_id, skipped
        );
        let messages = self
            .client
            .messages
            .list_since(&self.session, &conversation_id, self.state.cursor())
            .await?;
        let reactions = self
            .client
            .reactions
            .list_for_conversation(&self.session, &conversation_id)
            .await?;
        debug!("[Timeline] {} messages recovered", messages.len());
        self.state = reduce(
            std::mem::take(&mut self.state),
            &TimelineEvent::Loaded {
                messages,
                reactions,
            },
        );
        Ok(())
    }

    /// Emoji counts for a message from the local view
    pub fn counts_by_emoji(&self, message_id: &str) -> Vec<EmojiCount> {
        self.state.counts_by_emoji(message_id, &self.session.user_id)
    }

    /// Tear down the subscription; later events are ignored.
    pub fn close(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            info!("[Timeline] closed {}", self.state.conversation_id);
        }
    }
}

impl Drop for LiveTimeline {
    fn drop(&mut self) {
        self.close();
    }
}
