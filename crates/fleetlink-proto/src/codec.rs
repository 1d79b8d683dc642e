//! Envelope codec for text transports

use crate::{Envelope, ProtocolError};

/// Maximum envelope size (1MB)
pub const MAX_ENVELOPE_SIZE: usize = 1024 * 1024;

/// Codec for encoding/decoding envelopes as JSON text frames
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeCodec {
    /// Maximum envelope size allowed
    max_envelope_size: usize,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeCodec {
    /// Create a new codec with default settings
    pub fn new() -> Self {
        Self {
            max_envelope_size: MAX_ENVELOPE_SIZE,
        }
    }

    /// Create a new codec with custom max envelope size
    pub fn with_max_envelope_size(max_envelope_size: usize) -> Self {
        Self { max_envelope_size }
    }

    /// Encode an envelope to a text frame
    pub fn encode(&self, envelope: &Envelope) -> Result<String, ProtocolError> {
        let text = serde_json::to_string(envelope)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        self.check_size(text.len())?;
        Ok(text)
    }

    /// Decode a text frame into an envelope.
    ///
    /// Unknown `type` values decode to [`crate::Message::Unknown`] rather than
    /// failing, so a newer peer does not break the session.
    pub fn decode(&self, text: &str) -> Result<Envelope, ProtocolError> {
        self.check_size(text.len())?;
        Ok(serde_json::from_str(text)?)
    }

    fn check_size(&self, size: usize) -> Result<(), ProtocolError> {
        if size > self.max_envelope_size {
            return Err(ProtocolError::TooLarge {
                size,
                max: self.max_envelope_size,
            });
        }
        Ok(())
    }
}
