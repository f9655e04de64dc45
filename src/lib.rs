//! Lesson Guide: screenshot-driven lesson progression.

pub mod config;
pub mod engine;
pub mod error;
pub mod lesson;
pub mod llm;
pub mod notify;
pub mod oracle;
pub mod progress;
pub mod server;
pub mod store;
