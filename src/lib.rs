//! tenant-notify - multi-tenant alert notification dispatcher
//!
//! This library resolves the receivers subscribed to an alert group, renders
//! and splits messages per channel, and delivers them concurrently with a
//! shared access-token cache.

pub mod batch;
pub mod cli;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod group;
pub mod notifier;
pub mod receivers;
pub mod resolver;
pub mod secrets;
pub mod template;
pub mod token;

// Re-export core types for convenience
pub use crate::core::*;
pub use crate::error::NotifyError;
