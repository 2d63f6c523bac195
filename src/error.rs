//! Error types for the SMS forwarder.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid rule {name}: {reason}")]
    InvalidRule { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Notification dispatch errors. Never fatal: the routing engine logs them
/// and moves on to the next rule.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("HTTP request to {channel} failed: {reason}")]
    Http { channel: String, reason: String },

    #[error("{channel} responded with {status}: {body}")]
    Status {
        channel: String,
        status: u16,
        body: String,
    },

    #[error("{channel} timed out after {timeout:?}")]
    Timeout { channel: String, timeout: Duration },

    #[error("SMTP submission failed: {0}")]
    Smtp(String),

    #[error("Invalid {channel} payload: {reason}")]
    InvalidPayload { channel: String, reason: String },
}

/// Errors from the polled message store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open message store: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Query timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors from the persisted ingestion cursor.
#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("Cursor cannot move backwards: current {current}, requested {requested}")]
    Regression { current: i64, requested: i64 },

    #[error("Cursor IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cursor serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
