//! Reaction module
//!
//! Toggleable per-user emoji annotations layered over the message log.

pub mod dao;
pub mod models;
pub mod service;

pub use dao::ReactionDao;
pub use models::{count_by_emoji, validate_emoji, EmojiCount, Reaction, ToggleOutcome};
pub use service::ReactionOverlay;
