//! Error types shared by the codec and parser layers

use thiserror::Error;

use super::message::Protocol;

/// Field-level encode/decode failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Payload ended before a fixed-size structure was complete
    #[error("buffer too short: need {needed} bytes, have {available}")]
    BufferTooShort {
        /// Bytes required
        needed: usize,
        /// Bytes present
        available: usize,
    },

    /// A bit field would extend past the end of the buffer
    #[error("bit field {position}+{length} out of range ({available} bits available)")]
    OutOfBounds {
        /// First bit of the field
        position: usize,
        /// Field width in bits
        length: usize,
        /// Bits in the buffer
        available: usize,
    },

    /// Field content is not acceptable
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// What went wrong
        reason: String,
    },

    /// Operation is not available for this message type
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

impl CodecError {
    /// Fail with [`CodecError::BufferTooShort`] if `buf` is shorter than `needed`
    pub fn require(buf: &[u8], needed: usize) -> Result<(), CodecError> {
        if buf.len() < needed {
            return Err(CodecError::BufferTooShort {
                needed,
                available: buf.len(),
            });
        }
        Ok(())
    }

    /// Shorthand for [`CodecError::InvalidField`]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        CodecError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors reported on a parser's error stream
///
/// None of these stop ingestion. Every variant names the protocol that
/// produced it; connection-level failures use [`Protocol::Common`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Frame integrity check failed
    #[error("[{protocol}] checksum mismatch{}: expected {expected:#x}, computed {computed:#x}", fmt_id(.message_id))]
    Crc {
        /// Owning protocol
        protocol: Protocol,
        /// Id decoded from the header, when the header was readable
        message_id: Option<String>,
        /// Value carried by the frame
        expected: u32,
        /// Value computed over the received bytes
        computed: u32,
    },

    /// Valid frame whose id has no registered constructor
    #[error("[{protocol}] unknown message {message_id}")]
    UnknownMessage {
        /// Owning protocol
        protocol: Protocol,
        /// Decoded id
        message_id: String,
    },

    /// Payload could not be decoded into the registered message type
    #[error("[{protocol}] failed to decode {name} ({message_id}): {source}")]
    Deserialize {
        /// Owning protocol
        protocol: Protocol,
        /// Decoded id
        message_id: String,
        /// Message name
        name: &'static str,
        /// Codec failure
        source: CodecError,
    },

    /// Message decoded and published but payload bytes were left over
    #[error("[{protocol}] {name} ({message_id}) left {remaining} trailing bytes")]
    TrailingData {
        /// Owning protocol
        protocol: Protocol,
        /// Decoded id
        message_id: String,
        /// Message name
        name: &'static str,
        /// Unconsumed payload bytes
        remaining: usize,
    },

    /// A publish tap rejected or panicked on a message
    #[error("[{protocol}] publish of {name} ({message_id}) failed: {reason}")]
    Publish {
        /// Owning protocol
        protocol: Protocol,
        /// Decoded id
        message_id: String,
        /// Message name
        name: &'static str,
        /// Tap failure description
        reason: String,
    },

    /// Parser or connection failure not tied to one frame
    #[error("[{protocol}] internal error: {reason}")]
    Internal {
        /// Owning protocol
        protocol: Protocol,
        /// Description
        reason: String,
    },
}

fn fmt_id(id: &Option<String>) -> String {
    id.as_ref().map(|id| format!(" in {id}")).unwrap_or_default()
}

impl ParseError {
    /// Protocol that produced this error
    pub fn protocol(&self) -> Protocol {
        match self {
            ParseError::Crc { protocol, .. }
            | ParseError::UnknownMessage { protocol, .. }
            | ParseError::Deserialize { protocol, .. }
            | ParseError::TrailingData { protocol, .. }
            | ParseError::Publish { protocol, .. }
            | ParseError::Internal { protocol, .. } => *protocol,
        }
    }

    /// Message id, when one was decoded
    pub fn message_id(&self) -> Option<&str> {
        match self {
            ParseError::Crc { message_id, .. } => message_id.as_deref(),
            ParseError::UnknownMessage { message_id, .. }
            | ParseError::Deserialize { message_id, .. }
            | ParseError::TrailingData { message_id, .. }
            | ParseError::Publish { message_id, .. } => Some(message_id),
            ParseError::Internal { .. } => None,
        }
    }

    /// True for checksum failures
    pub fn is_crc(&self) -> bool {
        matches!(self, ParseError::Crc { .. })
    }
}

/// Message registry configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Two factories produced the same id
    #[error("duplicate message id {id} for {protocol}")]
    Duplicate {
        /// Owning protocol
        protocol: Protocol,
        /// Offending id
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_protocol_and_id() {
        let err = ParseError::Crc {
            protocol: Protocol::Ubx,
            message_id: Some("0x0A-0x04".into()),
            expected: 0x1234,
            computed: 0x4321,
        };
        let text = err.to_string();
        assert!(text.starts_with("[UBX]"));
        assert!(text.contains("0x0A-0x04"));
        assert!(err.is_crc());
        assert_eq!(err.protocol(), Protocol::Ubx);
    }

    #[test]
    fn test_require() {
        assert!(CodecError::require(&[0; 4], 4).is_ok());
        assert_eq!(
            CodecError::require(&[0; 2], 4),
            Err(CodecError::BufferTooShort {
                needed: 4,
                available: 2
            })
        );
    }
}
