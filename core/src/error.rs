/// Error types for the sync layer
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure reported by the collaborator REST API.
///
/// Mirrors the `{ message, status? }` object the server returns, so it can be
/// stored verbatim as a list-level cache error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }

    /// True for 401/403, which invalidate the session credential
    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status, Some(401) | Some(403))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (status {})", self.message, status),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ApiError {}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Handshake rejected: {0}")]
    Handshake(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Channel closed: {0}")]
    Closed(String),

    #[error("Session changed before the response arrived")]
    SessionChanged,
}

impl SyncError {
    /// Message suitable for a list-level cache error field
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Api(e) => e.message.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
