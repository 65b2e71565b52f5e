//! Message listener callback interface

use async_trait::async_trait;

use crate::im::message::models::Message;
use crate::im::reaction::models::Reaction;

/// Receives live changes for the conversations a client is subscribed to
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// A message was appended
    async fn on_new_message(&self, message: Message);

    async fn on_reaction_added(&self, _conversation_id: String, _reaction: Reaction) {}

    async fn on_reaction_removed(&self, _conversation_id: String, _reaction: Reaction) {}
}

/// Default no-op listener
pub struct EmptyMessageListener;

#[async_trait]
impl MessageListener for EmptyMessageListener {
    async fn on_new_message(&self, _message: Message) {}
}
