pub mod client;
pub mod config;
pub mod conflict;
pub mod conversation;
pub mod db;
pub mod error;
pub mod feed;
pub mod follow;
pub mod message;
pub mod profile;
pub mod reaction;
pub mod session;
pub mod storage;
pub mod timeline;

#[cfg(test)]
pub(crate) mod testing;

// Re-export the error type every caller handles
pub use error::{ChatError, ErrorKind, Result};
