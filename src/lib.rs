//! SMS forward: routes inbound short messages to notification channels.

pub mod config;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod message;
pub mod notify;
pub mod routing;
pub mod rules;
