//! Conversation module
//!
//! One direct conversation per unordered pair of identities.

pub mod dao;
pub mod models;
pub mod service;

pub use dao::ConversationDao;
pub use models::{canonical_pair, Conversation, ConversationSummary};
pub use service::ConversationService;
