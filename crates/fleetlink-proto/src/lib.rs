//! # Fleetlink Protocol
//!
//! Envelope definitions, command model, and text codec shared by Fleetlink
//! agents and the relay.

#![warn(missing_docs)]

/// Message types and enums
pub mod message;

/// Envelope codec for text transports
pub mod codec;

/// Command model and lifecycle
pub mod command;

/// Error types for protocol operations
pub mod error;

pub use codec::{EnvelopeCodec, MAX_ENVELOPE_SIZE};
pub use command::{Command, CommandKind, CommandStatus, ConfigSnapshot};
pub use error::{CommandError, ProtocolError};
pub use message::{monotonic_millis, Envelope, Message, SYNC_FREQUENCY_CONFIG};

/// Item queued for a session's single writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Encoded envelope to send as a text frame
    Text(String),
    /// Send a close frame and stop writing
    Close,
}
