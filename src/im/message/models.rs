//! Message log models

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::im::error::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Written by a participant
    User,
    /// Written by the system on a participant's behalf (welcome message)
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::System => "system",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageKind::User),
            "system" => Ok(MessageKind::System),
            other => Err(ChatError::Validation(format!("unknown message kind {other:?}"))),
        }
    }
}

/// One immutable entry in a conversation's log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    /// Log-assigned insertion order, breaks timestamp ties
    pub seq: i64,
    pub conversation_id: String,
    pub sender_id: String,
    pub kind: MessageKind,
    pub content: String,
    pub media_url: Option<String>,
    pub created_at: i64,
}

impl Message {
    pub fn cursor(&self) -> MessageCursor {
        MessageCursor {
            created_at: self.created_at,
            seq: self.seq,
        }
    }

    /// Log order: creation time, then insertion order
    pub fn log_order(&self, other: &Message) -> Ordering {
        self.cursor().cmp(&other.cursor())
    }
}

/// Position in a conversation's log; `list_since` returns messages strictly after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCursor {
    pub created_at: i64,
    pub seq: i64,
}

/// An already-uploaded file to attach to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub url: String,
    /// Original filename, used as the text of a media-only message
    pub filename: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(created_at: i64, seq: i64) -> Message {
        Message {
            id: format!("m{seq}"),
            seq,
            conversation_id: "c".into(),
            sender_id: "u".into(),
            kind: MessageKind::User,
            content: "x".into(),
            media_url: None,
            created_at,
        }
    }

    #[test]
    fn ties_on_time_break_by_seq() {
        let mut log = vec![msg(20, 3), msg(10, 2), msg(20, 1)];
        log.sort_by(|a, b| a.log_order(b));
        let seqs: Vec<i64> = log.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![2, 1, 3]);
    }

    #[test]
    fn kind_serializes_lowercase() {
        let json = serde_json::to_string(&msg(1, 1)).unwrap();
        assert!(json.contains(r#""kind":"user""#));
        assert!(json.contains(r#""conversationId":"c""#));
    }
}
