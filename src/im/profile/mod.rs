//! Profile module
//!
//! Identity store: one profile per identity, provisioned at signup.

pub mod dao;
pub mod models;
pub mod service;

pub use dao::ProfileDao;
pub use models::{Profile, ProfileUpdate};
pub use service::ProfileService;
