//! Error types for the daemon client core.

use std::io;

use thiserror::Error;

/// Errors that can occur in the client core.
#[derive(Error, Debug)]
pub enum SomeIpError {
    /// I/O error in a transport collaborator.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Message too short to contain the expected structure.
    #[error("Message too short: expected at least {expected} bytes, got {actual}")]
    MessageTooShort { expected: usize, actual: usize },

    /// SOME/IP header length field disagrees with the frame size.
    #[error("Message length mismatch: header says {header_length} bytes, got {actual_length}")]
    LengthMismatch {
        header_length: u32,
        actual_length: usize,
    },

    /// Invalid message header field.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Unknown SD entry type value.
    #[error("Unknown entry type: 0x{0:02X}")]
    UnknownEntryType(u8),

    /// Unknown SD option type whose discardable flag is not set.
    #[error("Unknown non-discardable option type: 0x{0:02X}")]
    UnknownOption(u8),

    /// An SD entry or option section overruns its declared length.
    #[error("Section overrun: {0}")]
    SectionOverrun(String),

    /// Unknown transport protocol value in an endpoint option.
    #[error("Unknown transport protocol: 0x{0:02X}")]
    UnknownProtocol(u8),

    /// Local send for a method not present in the deployment.
    #[error("Unknown method: 0x{0:04X}")]
    UnknownMethod(u16),

    /// Local send while no active offer is present.
    #[error("Service not offered")]
    ServiceNotOffered,

    /// Required sender for the requested protocol is not constructed.
    #[error("Connection not available")]
    ConnectionNotAvailable,

    /// The underlying transport send call failed.
    #[error("Connection transmission failed")]
    ConnectionTransmissionFailed,

    /// A subscription entry could not be built yet (local endpoint missing).
    #[error("Subscription endpoint not registered: {0}")]
    EndpointNotRegistered(&'static str),
}

/// Result type alias for client core operations.
pub type Result<T> = std::result::Result<T, SomeIpError>;

impl SomeIpError {
    /// Create a new invalid header error.
    pub fn invalid_header(msg: impl Into<String>) -> Self {
        Self::InvalidHeader(msg.into())
    }

    /// Create a new section overrun error.
    pub fn section_overrun(msg: impl Into<String>) -> Self {
        Self::SectionOverrun(msg.into())
    }

    /// Check if this error denotes a malformed wire message.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::MessageTooShort { .. }
                | Self::LengthMismatch { .. }
                | Self::InvalidHeader(_)
                | Self::UnknownEntryType(_)
                | Self::UnknownOption(_)
                | Self::SectionOverrun(_)
                | Self::UnknownProtocol(_)
        )
    }
}
