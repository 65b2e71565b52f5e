//! Reaction overlay models

use serde::{Deserialize, Serialize};

use crate::im::error::{ChatError, Result};

pub const EMOJI_MAX_CHARS: usize = 16;

/// One (message, user, emoji) fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: i64,
}

impl Reaction {
    pub fn is(&self, message_id: &str, user_id: &str, emoji: &str) -> bool {
        self.message_id == message_id && self.user_id == user_id && self.emoji == emoji
    }
}

/// What a toggle ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Added(Reaction),
    /// The known row was removed (or was already gone)
    Removed(Reaction),
    /// An add lost to an identical row written elsewhere; that row is returned
    AlreadyApplied(Reaction),
}

impl ToggleOutcome {
    pub fn reaction(&self) -> &Reaction {
        match self {
            ToggleOutcome::Added(r) | ToggleOutcome::Removed(r) | ToggleOutcome::AlreadyApplied(r) => r,
        }
    }

    /// Whether the caller's reaction is present after the toggle
    pub fn is_present(&self) -> bool {
        !matches!(self, ToggleOutcome::Removed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmojiCount {
    pub emoji: String,
    pub count: usize,
    pub reacted_by_viewer: bool,
}

/// Group reactions by emoji, in order of each emoji's first appearance.
pub fn count_by_emoji<'a, I>(reactions: I, viewer_id: &str) -> Vec<EmojiCount>
where
    I: IntoIterator<Item = &'a Reaction>,
{
    let mut counts: Vec<EmojiCount> = Vec::new();
    for reaction in reactions {
        let mine = reaction.user_id == viewer_id;
        match counts.iter_mut().find(|c| c.emoji == reaction.emoji) {
            Some(entry) => {
                entry.count += 1;
                entry.reacted_by_viewer |= mine;
            }
            None => counts.push(EmojiCount {
                emoji: reaction.emoji.clone(),
                count: 1,
                reacted_by_viewer: mine,
            }),
        }
    }
    counts
}

pub fn validate_emoji(emoji: &str) -> Result<()> {
    if emoji.is_empty() {
        return Err(ChatError::Validation("emoji is empty".into()));
    }
    if emoji.chars().any(char::is_whitespace) {
        return Err(ChatError::Validation("emoji cannot contain whitespace".into()));
    }
    if emoji.chars().count() > EMOJI_MAX_CHARS {
        return Err(ChatError::Validation(format!(
            "emoji is limited to {EMOJI_MAX_CHARS} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(id: &str, user: &str, emoji: &str) -> Reaction {
        Reaction {
            id: id.into(),
            message_id: "m".into(),
            user_id: user.into(),
            emoji: emoji.into(),
            created_at: 0,
        }
    }

    #[test]
    fn counts_group_in_first_seen_order() {
        let reactions = vec![
            r("1", "bob", "🔥"),
            r("2", "amy", "👍"),
            r("3", "amy", "🔥"),
            r("4", "cal", "🔥"),
        ];
        let counts = count_by_emoji(&reactions, "amy");
        assert_eq!(
            counts,
            vec![
                EmojiCount { emoji: "🔥".into(), count: 3, reacted_by_viewer: true },
                EmojiCount { emoji: "👍".into(), count: 1, reacted_by_viewer: true },
            ]
        );
        assert!(!count_by_emoji(&reactions, "bob")[1].reacted_by_viewer);
    }

    #[test]
    fn emoji_validation() {
        assert!(validate_emoji("👍").is_ok());
        assert!(validate_emoji(":party_parrot:").is_ok());
        assert!(validate_emoji("").is_err());
        assert!(validate_emoji("a b").is_err());
        assert!(validate_emoji(&"x".repeat(EMOJI_MAX_CHARS + 1)).is_err());
    }
}
