//! Error types for mailcast.

use std::path::PathBuf;

/// Top-level error type for a run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),
}

/// Configuration-related errors. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Malformed alias rule in {key}: expected 'address|account|password'")]
    MalformedAlias { key: String },

    #[error("No ALIAS_* routing rules configured")]
    NoAliases,

    #[error("Duplicate alias address: {0}")]
    DuplicateAlias(String),
}

/// Mailbox (IMAP) errors. A failed fetch aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Connection to {host}:{port} failed: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("Login refused for {username}")]
    LoginRefused { username: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Fetch task panicked: {0}")]
    TaskPanicked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Publisher errors. Contained at the per-message boundary — the message
/// stays out of the ledger and is retried on the next run.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Login failed for {account}: {reason}")]
    LoginFailed { account: String, reason: String },

    #[error("Post rejected for {account}: {reason}")]
    Rejected { account: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Dedup ledger errors. Fatal for the remainder of a run — losing dedup
/// state risks mass duplicate reposting.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Failed to open ledger at {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to append to ledger: {0}")]
    Append(std::io::Error),

    #[error("Failed to flush ledger: {0}")]
    Flush(std::io::Error),
}

/// Result type alias for mailcast.
pub type Result<T> = std::result::Result<T, Error>;
