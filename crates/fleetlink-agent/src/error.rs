//! Error types for the agent

use std::time::Duration;
use thiserror::Error;

/// Transport-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    /// Handshake with the relay failed
    #[error("Connection error: {0}")]
    Connect(String),

    /// The link is gone
    #[error("Transport closed")]
    Closed,
}

/// Main error type for agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    /// Transport-related errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] fleetlink_proto::ProtocolError),

    /// Transport handshake did not finish in time
    #[error("Handshake with relay did not complete within {0:?}")]
    ConnectTimeout(Duration),

    /// Relay did not acknowledge the session in time
    #[error("No acknowledgment from relay after {0:?}")]
    AckTimeout(Duration),

    /// Every connection attempt failed
    #[error("Gave up after {attempts} connection attempts")]
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
    },

    /// The connection task panicked or was aborted
    #[error("Connection task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A connection sequence or session is already active
    #[error("Connection already in progress")]
    AlreadyConnecting,

    /// Operation needs a live session
    #[error("Not connected")]
    NotConnected,

    /// Component was bound twice
    #[error("{0} is already wired")]
    AlreadyWired(&'static str),

    /// Sync frequency must be a positive number of seconds
    #[error("Invalid sync frequency: {0}")]
    InvalidSyncFrequency(i64),
}

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;
