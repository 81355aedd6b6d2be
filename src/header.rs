//! SOME/IP header types and ID newtypes.

use crate::error::{Result, SomeIpError};
use crate::types::{MessageType, ReturnCode, PROTOCOL_VERSION};

/// Size of the SOME/IP header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Service ID - identifies a SOME/IP service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ServiceId(pub u16);

/// Method ID - identifies a method within a service.
/// Bit 15 indicates if this is an event (1) or method (0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MethodId(pub u16);

/// Event ID - identifies an event within a service (method ID with bit 15 set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct EventId(pub u16);

/// Client ID - identifies the client making a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClientId(pub u16);

/// Session ID - unique identifier for a request/response pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionId(pub u16);

impl MethodId {
    /// Check if this method ID represents an event (bit 15 set).
    pub fn is_event(&self) -> bool {
        self.0 & 0x8000 != 0
    }
}

impl EventId {
    /// Check if this ID is in the SOME/IP event range (bit 15 set).
    pub fn is_notification(&self) -> bool {
        self.0 & 0x8000 != 0
    }
}

impl From<EventId> for MethodId {
    fn from(id: EventId) -> Self {
        MethodId(id.0)
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl std::fmt::Display for MethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// SOME/IP message header (16 bytes).
///
/// ```text
/// +----------------+----------------+----------------+----------------+
/// |   Service ID (16 bits)  |  Method ID (16 bits)                    |
/// +----------------+----------------+----------------+----------------+
/// |           Length (32 bits) - payload length + 8                   |
/// +----------------+----------------+----------------+----------------+
/// |   Client ID (16 bits)   |  Session ID (16 bits)                   |
/// +----------------+----------------+----------------+----------------+
/// | Protocol Ver | Interface Ver | Message Type | Return Code         |
/// +----------------+----------------+----------------+----------------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SomeIpHeader {
    /// Service ID.
    pub service_id: ServiceId,
    /// Method ID.
    pub method_id: MethodId,
    /// Length of payload + 8 bytes (client_id through return_code).
    pub length: u32,
    /// Client ID.
    pub client_id: ClientId,
    /// Session ID.
    pub session_id: SessionId,
    /// Protocol version (should be 0x01).
    pub protocol_version: u8,
    /// Interface version.
    pub interface_version: u8,
    /// Message type.
    pub message_type: MessageType,
    /// Return code.
    pub return_code: ReturnCode,
}

impl SomeIpHeader {
    /// Create a new header with the given service and method IDs.
    pub fn new(service_id: ServiceId, method_id: MethodId) -> Self {
        Self {
            service_id,
            method_id,
            length: 8,
            client_id: ClientId::default(),
            session_id: SessionId::default(),
            protocol_version: PROTOCOL_VERSION,
            interface_version: 1,
            message_type: MessageType::Request,
            return_code: ReturnCode::Ok,
        }
    }

    /// Create a request header.
    pub fn request(service_id: ServiceId, method_id: MethodId) -> Self {
        let mut header = Self::new(service_id, method_id);
        header.message_type = MessageType::Request;
        header
    }

    /// Create a notification header.
    pub fn notification(service_id: ServiceId, method_id: MethodId) -> Self {
        let mut header = Self::new(service_id, method_id);
        header.message_type = MessageType::Notification;
        header
    }

    /// Get the payload length (total length minus the 8 trailing header bytes).
    pub fn payload_length(&self) -> u32 {
        self.length.saturating_sub(8)
    }

    /// Set the length field from a payload length.
    pub fn set_payload_length(&mut self, payload_length: u32) {
        self.length = payload_length + 8;
    }

    /// Parse a header from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(SomeIpError::MessageTooShort {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }

        let service_id = ServiceId(u16::from_be_bytes([data[0], data[1]]));
        let method_id = MethodId(u16::from_be_bytes([data[2], data[3]]));
        let length = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let client_id = ClientId(u16::from_be_bytes([data[8], data[9]]));
        let session_id = SessionId(u16::from_be_bytes([data[10], data[11]]));
        let protocol_version = data[12];
        let interface_version = data[13];

        if protocol_version != PROTOCOL_VERSION {
            return Err(SomeIpError::invalid_header(format!(
                "Wrong protocol version: expected 0x01, got 0x{protocol_version:02X}"
            )));
        }

        let message_type = MessageType::from_u8(data[14])
            .ok_or_else(|| SomeIpError::invalid_header(format!("Unknown message type: 0x{:02X}", data[14])))?;
        let return_code = ReturnCode::from_u8(data[15])
            .ok_or_else(|| SomeIpError::invalid_header(format!("Unknown return code: 0x{:02X}", data[15])))?;

        Ok(Self {
            service_id,
            method_id,
            length,
            client_id,
            session_id,
            protocol_version,
            interface_version,
            message_type,
            return_code,
        })
    }

    /// Serialize the header to bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.service_id.0.to_be_bytes());
        buf[2..4].copy_from_slice(&self.method_id.0.to_be_bytes());
        buf[4..8].copy_from_slice(&self.length.to_be_bytes());
        buf[8..10].copy_from_slice(&self.client_id.0.to_be_bytes());
        buf[10..12].copy_from_slice(&self.session_id.0.to_be_bytes());
        buf[12] = self.protocol_version;
        buf[13] = self.interface_version;
        buf[14] = self.message_type as u8;
        buf[15] = self.return_code as u8;
        buf
    }
}
