//! Follow listener callback interface

use async_trait::async_trait;

use crate::im::follow::models::FollowEdge;

/// Receives follow-edge changes that involve the listening identity
#[async_trait]
pub trait FollowListener: Send + Sync {
    /// A new pending request was created (in either direction)
    async fn on_follow_requested(&self, edge: FollowEdge);

    /// A request was accepted or rejected
    async fn on_follow_resolved(&self, edge: FollowEdge);

    /// A pending request was withdrawn by its follower
    async fn on_follow_cancelled(&self, _edge: FollowEdge) {}
}

/// Default no-op listener
pub struct EmptyFollowListener;

#[async_trait]
impl FollowListener for EmptyFollowListener {
    async fn on_follow_requested(&self, _edge: FollowEdge) {}
    async fn on_follow_resolved(&self, _edge: FollowEdge) {}
}
