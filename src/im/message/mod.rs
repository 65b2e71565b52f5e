//! Message module
//!
//! Append-only, per-conversation message log plus its live stream.

pub mod dao;
pub mod listener;
pub mod models;
pub mod service;

pub use dao::MessageDao;
pub use listener::{EmptyMessageListener, MessageListener};
pub use models::{MediaAttachment, Message, MessageCursor, MessageKind};
pub use service::MessageLog;
