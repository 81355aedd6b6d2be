//! SOME/IP message handling.

use std::time::Duration;

use bytes::Bytes;

use crate::error::{Result, SomeIpError};
use crate::header::{ClientId, MethodId, ServiceId, SessionId, SomeIpHeader, HEADER_SIZE};
use crate::types::{MessageType, ReturnCode};

/// A complete SOME/IP message (header + payload).
///
/// Payload bytes are opaque to the daemon core; serialization of user data
/// happens in the bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SomeIpMessage {
    /// Message header.
    pub header: SomeIpHeader,
    /// Message payload.
    pub payload: Bytes,
}

impl SomeIpMessage {
    /// Create a new message with the given header and payload.
    pub fn new(mut header: SomeIpHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        header.set_payload_length(payload.len() as u32);
        Self { header, payload }
    }

    /// Create a request message builder.
    pub fn request(service_id: ServiceId, method_id: MethodId) -> MessageBuilder {
        MessageBuilder::new(service_id, method_id, MessageType::Request)
    }

    /// Create a request-no-return message builder.
    pub fn request_no_return(service_id: ServiceId, method_id: MethodId) -> MessageBuilder {
        MessageBuilder::new(service_id, method_id, MessageType::RequestNoReturn)
    }

    /// Create a notification message builder.
    pub fn notification(service_id: ServiceId, method_id: MethodId) -> MessageBuilder {
        MessageBuilder::new(service_id, method_id, MessageType::Notification)
    }

    /// Parse a message from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(SomeIpError::MessageTooShort {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }

        let header = SomeIpHeader::from_bytes(data)?;
        let expected_total = HEADER_SIZE + header.payload_length() as usize;

        if data.len() != expected_total {
            return Err(SomeIpError::LengthMismatch {
                header_length: header.length,
                actual_length: data.len() - 8,
            });
        }

        let payload = Bytes::copy_from_slice(&data[HEADER_SIZE..expected_total]);

        Ok(Self { header, payload })
    }

    /// Serialize the message to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Get the total message size (header + payload).
    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Get the service ID.
    pub fn service_id(&self) -> ServiceId {
        self.header.service_id
    }

    /// Get the method ID.
    pub fn method_id(&self) -> MethodId {
        self.header.method_id
    }

    /// Get the session ID.
    pub fn session_id(&self) -> SessionId {
        self.header.session_id
    }
}

/// An outgoing packet: a SOME/IP message plus transmission metadata.
///
/// The accumulation timeout, if set, tells the UDP sender how long it may
/// aggregate this message with others into one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// The SOME/IP message to transmit.
    pub message: SomeIpMessage,
    /// Optional UDP message accumulation timeout.
    pub accumulation_timeout: Option<Duration>,
}

impl Packet {
    /// Wrap a message with no accumulation timeout.
    pub fn new(message: SomeIpMessage) -> Self {
        Self {
            message,
            accumulation_timeout: None,
        }
    }

    /// Set the accumulation timeout.
    pub fn set_accumulation_timeout(&mut self, timeout: Option<Duration>) {
        self.accumulation_timeout = timeout;
    }
}

impl From<SomeIpMessage> for Packet {
    fn from(message: SomeIpMessage) -> Self {
        Self::new(message)
    }
}

/// Builder for constructing SOME/IP messages.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    service_id: ServiceId,
    method_id: MethodId,
    client_id: ClientId,
    session_id: SessionId,
    interface_version: u8,
    message_type: MessageType,
    return_code: ReturnCode,
    payload: Bytes,
}

impl MessageBuilder {
    /// Create a new message builder.
    pub fn new(service_id: ServiceId, method_id: MethodId, message_type: MessageType) -> Self {
        Self {
            service_id,
            method_id,
            client_id: ClientId::default(),
            session_id: SessionId::default(),
            interface_version: 1,
            message_type,
            return_code: ReturnCode::Ok,
            payload: Bytes::new(),
        }
    }

    /// Set the client ID.
    pub fn client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = client_id;
        self
    }

    /// Set the session ID.
    pub fn session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = session_id;
        self
    }

    /// Set the interface version.
    pub fn interface_version(mut self, version: u8) -> Self {
        self.interface_version = version;
        self
    }

    /// Set the payload from bytes.
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Build the message.
    pub fn build(self) -> SomeIpMessage {
        let header = SomeIpHeader {
            service_id: self.service_id,
            method_id: self.method_id,
            length: 8 + self.payload.len() as u32,
            client_id: self.client_id,
            session_id: self.session_id,
            protocol_version: crate::types::PROTOCOL_VERSION,
            interface_version: self.interface_version,
            message_type: self.message_type,
            return_code: self.return_code,
        };

        SomeIpMessage {
            header,
            payload: self.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_builder() {
        let msg = SomeIpMessage::request(ServiceId(0x1234), MethodId(0x0001))
            .client_id(ClientId(0x0100))
            .session_id(SessionId(0x0001))
            .payload(b"hello".as_slice())
            .build();

        assert_eq!(msg.header.service_id, ServiceId(0x1234));
        assert_eq!(msg.header.method_id, MethodId(0x0001));
        assert_eq!(msg.header.client_id, ClientId(0x0100));
        assert_eq!(msg.header.message_type, MessageType::Request);
        assert_eq!(msg.payload.as_ref(), b"hello");
        assert_eq!(msg.header.length, 8 + 5);
    }

    #[test]
    fn test_message_roundtrip() {
        let original = SomeIpMessage::request(ServiceId(0x1234), MethodId(0x5678))
            .client_id(ClientId(0xABCD))
            .session_id(SessionId(0x0001))
            .payload(vec![1, 2, 3, 4, 5])
            .build();

        let bytes = original.to_bytes();
        let parsed = SomeIpMessage::from_bytes(&bytes).unwrap();

        assert_eq!(original, parsed);
    }

    #[test]
    fn test_parse_too_short() {
        let data = vec![0u8; 10];
        let result = SomeIpMessage::from_bytes(&data);
        assert!(matches!(result, Err(SomeIpError::MessageTooShort { .. })));
    }

    #[test]
    fn test_parse_length_mismatch() {
        let msg = SomeIpMessage::notification(ServiceId(0x1234), MethodId(0x8001))
            .payload(vec![0u8; 4])
            .build();
        let mut bytes = msg.to_bytes();
        // Truncate one payload byte so the header length no longer matches.
        bytes.pop();
        assert!(matches!(
            SomeIpMessage::from_bytes(&bytes),
            Err(SomeIpError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_packet_accumulation_timeout() {
        let msg = SomeIpMessage::request(ServiceId(0x1234), MethodId(0x0001)).build();
        let mut packet = Packet::new(msg);
        assert!(packet.accumulation_timeout.is_none());

        packet.set_accumulation_timeout(Some(Duration::from_millis(5)));
        assert_eq!(packet.accumulation_timeout, Some(Duration::from_millis(5)));
    }
}
