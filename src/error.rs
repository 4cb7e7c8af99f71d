//! Error types for mailpost.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration file {path}: {reason}")]
    ParseError { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox session errors: network, TLS, authentication and protocol.
///
/// Fatal during connect and fetch; reported but non-fatal during delete.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("{protocol} authentication failed: {reason}")]
    AuthFailed {
        protocol: &'static str,
        reason: String,
    },

    #[error("{protocol} command {command} rejected: {response}")]
    Rejected {
        protocol: &'static str,
        command: String,
        response: String,
    },

    #[error("{protocol} removed {deleted} of {requested} messages; {command} rejected: {response}")]
    PartialDelete {
        protocol: &'static str,
        command: String,
        deleted: usize,
        requested: usize,
        response: String,
    },

    #[error("Malformed {protocol} response: {detail}")]
    Malformed {
        protocol: &'static str,
        detail: String,
    },

    #[error("Connection closed by server")]
    Closed,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Session task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectionError {
    /// Build a malformed-response error for `protocol`.
    pub fn malformed(protocol: &'static str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            protocol,
            detail: detail.into(),
        }
    }
}

/// Article store / author directory errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Attachment {filename} could not be saved: {reason}")]
    Attachment { filename: String, reason: String },
}

/// Acknowledgement delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP send failed: {0}")]
    Send(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
