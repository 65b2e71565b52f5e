//! Runtime configuration

use std::path::PathBuf;

/// Upper bound on a single uploaded file (avatars and attachments).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 4000;

pub const DEFAULT_FEED_CAPACITY: usize = 256;

pub const DEFAULT_WELCOME_MESSAGE: &str = "You are now connected. Say hi! 👋";

/// Chat core configuration
#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// SQLite URL, e.g. `sqlite://followchat.db?mode=rwc` or `sqlite::memory:`
    pub db_url: String,
    /// Pool size; forced to 1 for in-memory databases
    pub max_connections: u32,
    /// Directory that backs the object store
    pub media_root: PathBuf,
    /// Public prefix prepended to stored object paths
    pub media_base_url: String,
    pub max_upload_bytes: usize,
    pub max_message_chars: usize,
    /// Buffered events per change-feed receiver before it lags
    pub feed_capacity: usize,
    /// Text of the system message appended when a follow request is accepted
    pub welcome_message: String,
    /// Whether an identity may send a follow request to itself
    pub allow_self_follow: bool,
}

impl ChatConfig {
    /// Create default configuration
    pub fn new(db_url: impl Into<String>) -> Self {
        Self {
            db_url: db_url.into(),
            max_connections: 5,
            media_root: PathBuf::from("media"),
            media_base_url: "/media".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
            feed_capacity: DEFAULT_FEED_CAPACITY,
            welcome_message: DEFAULT_WELCOME_MESSAGE.to_string(),
            allow_self_follow: true,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.db_url.contains(":memory:") || self.db_url.contains("mode=memory")
    }
}
