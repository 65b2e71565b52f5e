//! Conversation models

use serde::{Deserialize, Serialize};

use crate::im::message::models::Message;

/// Order two identity ids so the lower one comes first.
///
/// Every lookup and insert goes through this, which is what makes the
/// one-conversation-per-pair key hold regardless of who asks.
pub fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Direct conversation between exactly two identities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub user_low: String,
    pub user_high: String,
    pub created_at: i64,
}

impl Conversation {
    pub fn participants(&self) -> [&str; 2] {
        [&self.user_low, &self.user_high]
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.user_low == user_id || self.user_high == user_id
    }

    /// The other participant, or None when `user_id` is not part of it.
    /// A self-conversation returns the caller.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        if self.user_low == user_id {
            Some(&self.user_high)
        } else if self.user_high == user_id {
            Some(&self.user_low)
        } else {
            None
        }
    }
}

/// Conversation list entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub peer_id: String,
    pub latest_message: Option<Message>,
}

impl ConversationSummary {
    /// Timestamp used for list ordering
    pub fn last_activity(&self) -> i64 {
        self.latest_message
            .as_ref()
            .map(|m| m.created_at)
            .unwrap_or(self.conversation.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_pair_is_order_independent() {
        assert_eq!(canonical_pair("bob", "alice"), ("alice", "bob"));
        assert_eq!(canonical_pair("alice", "bob"), ("alice", "bob"));
        assert_eq!(canonical_pair("same", "same"), ("same", "same"));
    }

    #[test]
    fn peer_lookup() {
        let conv = Conversation {
            id: "c1".into(),
            user_low: "a".into(),
            user_high: "b".into(),
            created_at: 0,
        };
        assert_eq!(conv.peer_of("a"), Some("b"));
        assert_eq!(conv.peer_of("b"), Some("a"));
        assert_eq!(conv.peer_of("z"), None);
        assert!(conv.has_participant("b"));
    }
}
