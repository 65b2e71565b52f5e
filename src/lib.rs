pub mod im;

// Re-export the commonly used types
pub use im::{
    client::ChatClient,
    config::ChatConfig,
    conversation::{Conversation, ConversationSummary},
    error::{ChatError, ErrorKind},
    feed::{ChangeEvent, ChangeFeed, ChangeOp, Delivery, FeedFilter, Record, Subscription},
    follow::{Decision, FollowEdge, FollowListener, FollowStatus},
    message::{MediaAttachment, Message, MessageCursor, MessageKind, MessageListener},
    profile::Profile,
    reaction::{EmojiCount, Reaction, ToggleOutcome},
    session::Session,
    timeline::{reduce, LiveTimeline, TimelineEvent, TimelineState},
};
