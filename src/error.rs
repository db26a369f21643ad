//! Error types for umb-ingest.

use thiserror::Error;

/// Main error type for ingest operations.
#[derive(Debug, Error)]
pub enum IngestError {
    /// I/O error during socket or file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error (storage output).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error (field catalog files).
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Registration packet could not yield a station identity or protocol tag.
    #[error("Registration error: {0}")]
    Registration(String),

    /// Protocol tag is not present in the registry.
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    /// Field catalog content is invalid.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Frame could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Errors raised while decoding a single frame or channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Frame is shorter than the fixed header.
    #[error("frame too short: need {needed} bytes, got {actual}")]
    TruncatedFrame { needed: usize, actual: usize },

    /// Channel record runs past the end of the frame.
    #[error("channel record at offset {offset} truncated")]
    TruncatedChannel { offset: usize },

    /// JSON frame body is not valid.
    #[error("malformed JSON frame: {0}")]
    MalformedJson(String),
}

/// Result type alias using IngestError.
pub type Result<T> = std::result::Result<T, IngestError>;
