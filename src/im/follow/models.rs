//! Follow ledger models

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::im::conversation::models::Conversation;
use crate::im::error::ChatError;
use crate::im::message::models::Message;

/// Tri-state approval status of a follow edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowStatus {
    Pending,
    Accepted,
    Rejected,
}

impl FollowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowStatus::Pending => "pending",
            FollowStatus::Accepted => "accepted",
            FollowStatus::Rejected => "rejected",
        }
    }

    /// Only pending edges move, and only forward.
    pub fn can_transition_to(&self, next: FollowStatus) -> bool {
        matches!(
            (self, next),
            (FollowStatus::Pending, FollowStatus::Accepted)
                | (FollowStatus::Pending, FollowStatus::Rejected)
        )
    }
}

impl fmt::Display for FollowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FollowStatus {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FollowStatus::Pending),
            "accepted" => Ok(FollowStatus::Accepted),
            "rejected" => Ok(FollowStatus::Rejected),
            other => Err(ChatError::Validation(format!("unknown follow status {other:?}"))),
        }
    }
}

/// Followee's answer to a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub fn target_status(&self) -> FollowStatus {
        match self {
            Decision::Accept => FollowStatus::Accepted,
            Decision::Reject => FollowStatus::Rejected,
        }
    }
}

impl FromStr for Decision {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accept" | "accepted" => Ok(Decision::Accept),
            "reject" | "rejected" => Ok(Decision::Reject),
            other => Err(ChatError::Validation(format!("unknown decision {other:?}"))),
        }
    }
}

/// Directed follow relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowEdge {
    pub id: String,
    pub follower_id: String,
    pub followee_id: String,
    pub status: FollowStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl FollowEdge {
    pub fn links(&self, a: &str, b: &str) -> bool {
        (self.follower_id == a && self.followee_id == b)
            || (self.follower_id == b && self.followee_id == a)
    }
}

/// Both directed edges between the caller and another identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    /// caller → other
    pub outgoing: Option<FollowEdge>,
    /// other → caller
    pub incoming: Option<FollowEdge>,
}

impl Relationship {
    pub fn is_connected(&self) -> bool {
        [&self.outgoing, &self.incoming]
            .iter()
            .any(|e| matches!(e, Some(edge) if edge.status == FollowStatus::Accepted))
    }
}

/// Result of answering a follow request
#[derive(Debug, Clone)]
pub struct FollowResponse {
    pub edge: FollowEdge,
    /// Present when the request was accepted
    pub conversation: Option<Conversation>,
    /// System welcome message appended on accept
    pub welcome: Option<Message>,
}
