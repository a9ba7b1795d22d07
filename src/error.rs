//! Error types for the SMS forwarder.

use std::path::PathBuf;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Forwarding error: {0}")]
    Forward(#[from] ForwardError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Neither {config} nor {sample} found")]
    NotFound { config: PathBuf, sample: PathBuf },

    #[error("Failed to parse configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Destination-level delivery errors.
///
/// A single recipient or provider failing is logged by the channel; only
/// when every destination fails does the channel count as failed.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Failed to send on {channel} to {destination}: {reason}")]
    SendFailed {
        channel: String,
        destination: String,
        reason: String,
    },

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Unsupported HTTP method {method} for provider {provider}")]
    UnsupportedMethod { provider: String, method: String },

    #[error("Provider {provider} returned HTTP {status}")]
    HttpStatus { provider: String, status: u16 },

    #[error("HTTP request to provider {provider} failed: {source}")]
    Http {
        provider: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Result type alias for the forwarder.
pub type Result<T> = std::result::Result<T, Error>;
