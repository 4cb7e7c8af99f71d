//! mailpost: turn authorized emails into site articles.

pub mod config;
pub mod error;
pub mod mailbox;
pub mod message;
pub mod notify;
pub mod pipeline;
pub mod store;
