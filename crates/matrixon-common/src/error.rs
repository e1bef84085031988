//! Error types for Matrixon
//!
//! Storage errors bubble up unwrapped to the accept path, which decides
//! between retrying and dropping a message. Clients never see the storage
//! detail: [`Error::client_message`] is the text handed to the routing layer
//! while the full error is logged.

use std::io;

use thiserror::Error;
use tracing::error;

/// Matrixon streams error type
#[derive(Debug, Error)]
pub enum Error {
    /// Storage failure or corrupt persisted data
    #[error("Database error: {0}")]
    Database(String),

    /// A state snapshot or block referenced by an event is absent
    #[error("Missing state: {0}")]
    MissingState(String),

    /// A caller broke an invariant (programmer error, never retried)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Resource not found where one was required
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Malformed input from a client or an upstream component
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    BadConfig(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The caller went away before the operation finished
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type for Matrixon operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn bad_database(message: &'static str) -> Self {
        error!("BadDatabase: {}", message);
        Self::Database(message.to_owned())
    }

    pub fn bad_config(message: &'static str) -> Self {
        error!("BadConfig: {}", message);
        Self::BadConfig(message.to_owned())
    }

    /// Whether retrying the same operation later may succeed.
    ///
    /// Consumers use this to decide between "do not acknowledge" and
    /// "drop the message".
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Io(_) | Self::Cancelled)
    }

    /// The message that may be shown to a client.
    pub fn client_message(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "Not found",
            Self::BadRequest(_) => "Bad request",
            _ => "Internal server error",
        }
    }
}
