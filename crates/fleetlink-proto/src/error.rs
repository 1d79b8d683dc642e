//! Error types for protocol operations

use crate::command::CommandStatus;
use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Text that is not a well-formed envelope
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// Envelope too large
    #[error("Envelope too large: {size} bytes (max: {max})")]
    TooLarge {
        /// Actual envelope size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Malformed(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

/// Errors raised by the command lifecycle
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// Transition not permitted by the lifecycle
    #[error("Illegal command transition: {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current status
        from: CommandStatus,
        /// Requested status
        to: CommandStatus,
    },
}
