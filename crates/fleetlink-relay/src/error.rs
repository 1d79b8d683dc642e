//! Error types for the relay

use thiserror::Error;

/// Main error type for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    /// Listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] fleetlink_proto::ProtocolError),

    /// Session queue is gone
    #[error("Session closed: {0}")]
    SessionClosed(String),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
