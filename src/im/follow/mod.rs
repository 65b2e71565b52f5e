//! Follow module
//!
//! Directed follow edges with pending/accepted/rejected status. An accepted
//! edge in either direction is what allows two identities to message.

pub mod dao;
pub mod listener;
pub mod models;
pub mod service;

pub use dao::FollowDao;
pub use listener::{EmptyFollowListener, FollowListener};
pub use models::{Decision, FollowEdge, FollowResponse, FollowStatus, Relationship};
pub use service::RelationshipGate;
