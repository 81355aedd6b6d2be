//! SOME/IP-SD message codec.
//!
//! An SD message is a SOME/IP notification with fixed header fields
//! (service 0xFFFF, method 0x8100) whose payload carries flags, an entries
//! section and an options section.

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::warn;

use crate::error::{Result, SomeIpError};
use crate::header::{ClientId, MethodId, ServiceId, SessionId, SomeIpHeader, HEADER_SIZE};
use crate::types::{MessageType, ReturnCode, PROTOCOL_VERSION};

use super::entry::SdEntry;
use super::option::SdOption;
use super::types::{SD_CLIENT_ID, SD_ENTRY_SIZE, SD_INTERFACE_VERSION, SD_METHOD_ID, SD_SERVICE_ID};

/// SD message flags (first payload byte). Bits other than Reboot and
/// Unicast are reserved as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SdFlags {
    /// Reboot flag - set until the session counter wrapped once after reboot.
    pub reboot: bool,
    /// Unicast flag - the sender supports receiving unicast SD messages.
    pub unicast: bool,
}

impl SdFlags {
    /// Parse flags from a byte.
    pub fn from_u8(byte: u8) -> Self {
        Self {
            reboot: (byte & 0x80) != 0,
            unicast: (byte & 0x40) != 0,
        }
    }

    /// Serialize flags to a byte.
    pub fn to_u8(&self) -> u8 {
        let mut byte = 0u8;
        if self.reboot {
            byte |= 0x80;
        }
        if self.unicast {
            byte |= 0x40;
        }
        byte
    }
}

/// A SOME/IP-SD message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdMessage {
    /// Message flags.
    pub flags: SdFlags,
    /// List of entries.
    pub entries: Vec<SdEntry>,
    /// List of options. Entries reference them by index.
    pub options: Vec<SdOption>,
}

impl SdMessage {
    /// Create a new empty SD message.
    pub fn new() -> Self {
        Self {
            flags: SdFlags::default(),
            entries: Vec::new(),
            options: Vec::new(),
        }
    }

    /// Parse an SD message from its payload bytes (after the SOME/IP header).
    ///
    /// Framing errors fail the whole message. Entries with an unrecognized
    /// type are skipped with a warning since the 16-byte entry stride keeps
    /// the rest of the message intact.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 12 {
            return Err(SomeIpError::MessageTooShort {
                expected: 12,
                actual: data.len(),
            });
        }

        let flags = SdFlags::from_u8(data[0]);
        // data[1..4] is reserved

        let entries_length = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
        if entries_length % SD_ENTRY_SIZE != 0 {
            return Err(SomeIpError::section_overrun(format!(
                "Entries length {entries_length} is not a multiple of {SD_ENTRY_SIZE}"
            )));
        }
        if data.len() < 8 + entries_length + 4 {
            return Err(SomeIpError::section_overrun(format!(
                "Entries length {entries_length} exceeds remaining {} bytes",
                data.len() - 12
            )));
        }

        let entries_data = &data[8..8 + entries_length];
        let mut entries = Vec::with_capacity(entries_length / SD_ENTRY_SIZE);
        let mut offset = 0;
        while offset + SD_ENTRY_SIZE <= entries_data.len() {
            match SdEntry::from_bytes(&entries_data[offset..offset + SD_ENTRY_SIZE]) {
                Ok(entry) => entries.push(entry),
                Err(SomeIpError::UnknownEntryType(t)) => {
                    warn!("Skipping SD entry with unknown type 0x{t:02X}");
                }
                Err(e) => return Err(e),
            }
            offset += SD_ENTRY_SIZE;
        }

        let options_offset = 8 + entries_length;
        let options_length = u32::from_be_bytes([
            data[options_offset],
            data[options_offset + 1],
            data[options_offset + 2],
            data[options_offset + 3],
        ]) as usize;

        let options_data = &data[options_offset + 4..];
        if options_data.len() < options_length {
            return Err(SomeIpError::section_overrun(format!(
                "Options length {options_length} exceeds remaining {} bytes",
                options_data.len()
            )));
        }

        let options_section = &options_data[..options_length];
        let mut options = Vec::new();
        let mut opt_offset = 0;
        while opt_offset < options_section.len() {
            let (option, size) = SdOption::from_bytes(&options_section[opt_offset..])?;
            options.push(option);
            opt_offset += size;
        }

        Ok(Self {
            flags,
            entries,
            options,
        })
    }

    /// Serialize the SD message payload (after the SOME/IP header).
    pub fn to_bytes(&self) -> Vec<u8> {
        let entries_length = self.entries.len() * SD_ENTRY_SIZE;
        let options_bytes: Vec<Vec<u8>> = self.options.iter().map(|o| o.to_bytes()).collect();
        let options_length: usize = options_bytes.iter().map(|b| b.len()).sum();

        let mut buf = Vec::with_capacity(8 + entries_length + 4 + options_length);

        buf.push(self.flags.to_u8());
        buf.extend_from_slice(&[0, 0, 0]); // Reserved

        buf.extend_from_slice(&(entries_length as u32).to_be_bytes());
        for entry in &self.entries {
            buf.extend_from_slice(&entry.to_bytes());
        }

        buf.extend_from_slice(&(options_length as u32).to_be_bytes());
        for option_bytes in options_bytes {
            buf.extend_from_slice(&option_bytes);
        }

        buf
    }

    /// Parse a full SD frame including the SOME/IP header.
    ///
    /// Validates the fixed SD header fields and the header length against
    /// the frame size.
    pub fn from_frame(data: &[u8]) -> Result<Self> {
        let header = SomeIpHeader::from_bytes(data)?;

        if data.len() != HEADER_SIZE + header.payload_length() as usize {
            return Err(SomeIpError::LengthMismatch {
                header_length: header.length,
                actual_length: data.len() - 8,
            });
        }
        if header.service_id != ServiceId(SD_SERVICE_ID) {
            return Err(SomeIpError::invalid_header(format!(
                "Expected SD service ID 0x{SD_SERVICE_ID:04X}, got {}",
                header.service_id
            )));
        }
        if header.method_id != MethodId(SD_METHOD_ID) {
            return Err(SomeIpError::invalid_header(format!(
                "Expected SD method ID 0x{SD_METHOD_ID:04X}, got {}",
                header.method_id
            )));
        }
        if header.interface_version != SD_INTERFACE_VERSION {
            return Err(SomeIpError::invalid_header(format!(
                "Expected SD interface version 0x01, got 0x{:02X}",
                header.interface_version
            )));
        }
        if header.message_type != MessageType::Notification {
            return Err(SomeIpError::invalid_header(format!(
                "Expected notification message type, got {:?}",
                header.message_type
            )));
        }

        Self::from_bytes(&data[HEADER_SIZE..])
    }

    /// Serialize a full SD frame with the fixed SOME/IP header and the given
    /// session ID.
    pub fn to_frame(&self, session_id: SessionId) -> Vec<u8> {
        let payload = self.to_bytes();
        let header = SomeIpHeader {
            service_id: ServiceId(SD_SERVICE_ID),
            method_id: MethodId(SD_METHOD_ID),
            length: 8 + payload.len() as u32,
            client_id: ClientId(SD_CLIENT_ID),
            session_id,
            protocol_version: PROTOCOL_VERSION,
            interface_version: SD_INTERFACE_VERSION,
            message_type: MessageType::Notification,
            return_code: ReturnCode::Ok,
        };

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(&payload);
        buf
    }

    /// Resolve the options referenced by an entry's option runs.
    ///
    /// A run referencing an option index outside the option array rejects
    /// the entry.
    pub fn options_for_entry(&self, entry: &SdEntry) -> Result<Vec<&SdOption>> {
        let (index1, num1, index2, num2) = entry.option_runs();
        let mut options = Vec::with_capacity((num1 + num2) as usize);

        for (index, num) in [(index1 as usize, num1 as usize), (index2 as usize, num2 as usize)] {
            for i in index..index + num {
                let option = self.options.get(i).ok_or_else(|| {
                    SomeIpError::section_overrun(format!(
                        "Entry references option index {i} but only {} options present",
                        self.options.len()
                    ))
                })?;
                options.push(option);
            }
        }

        Ok(options)
    }
}

impl Default for SdMessage {
    fn default() -> Self {
        Self::new()
    }
}

/// Session ID counter for SD messages towards one destination.
///
/// Session IDs are strictly positive and wrap from 0xFFFF to 0x0001.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCounter {
    next: u16,
}

impl SessionCounter {
    /// Create a counter starting at session ID 0x0001.
    pub fn new() -> Self {
        Self { next: 0x0001 }
    }

    /// Take the next session ID, advancing the counter.
    pub fn next(&mut self) -> SessionId {
        let id = SessionId(self.next);
        self.next = if self.next == 0xFFFF { 0x0001 } else { self.next + 1 };
        id
    }
}

impl Default for SessionCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-destination session counters.
#[derive(Debug, Default)]
pub struct DestinationSessions {
    counters: HashMap<SocketAddr, SessionCounter>,
}

impl DestinationSessions {
    /// Create an empty counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next session ID for the given destination.
    pub fn next_for(&mut self, destination: SocketAddr) -> SessionId {
        self.counters.entry(destination).or_default().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sd::entry::{EventgroupEntry, ServiceEntry};
    use crate::sd::option::Ipv4EndpointOption;
    use crate::sd::types::{EventgroupId, InstanceId, TransportProtocol};
    use std::net::Ipv4Addr;

    fn subscribe_message() -> SdMessage {
        let mut entry = EventgroupEntry::subscribe(
            ServiceId(0x1234),
            InstanceId(0x0001),
            1,
            EventgroupId(0x0010),
            3,
        );
        entry.num_options_1 = 1;
        SdMessage {
            flags: SdFlags {
                reboot: false,
                unicast: true,
            },
            entries: vec![SdEntry::Eventgroup(entry)],
            options: vec![SdOption::IPv4Endpoint(Ipv4EndpointOption::new(
                Ipv4Addr::new(192, 0, 2, 1),
                TransportProtocol::Udp,
                30501,
            ))],
        }
    }

    #[test]
    fn test_sd_flags_roundtrip() {
        let flags = SdFlags {
            reboot: true,
            unicast: true,
        };
        assert_eq!(flags.to_u8(), 0xC0);
        assert_eq!(SdFlags::from_u8(0xC0), flags);
    }

    #[test]
    fn test_sd_message_roundtrip() {
        let original = subscribe_message();
        let bytes = original.to_bytes();
        let parsed = SdMessage::from_bytes(&bytes).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_frame_roundtrip() {
        let original = subscribe_message();
        let frame = original.to_frame(SessionId(0x0042));

        let header = SomeIpHeader::from_bytes(&frame).unwrap();
        assert_eq!(header.service_id, ServiceId(0xFFFF));
        assert_eq!(header.method_id, MethodId(0x8100));
        assert_eq!(header.client_id, ClientId(0x0000));
        assert_eq!(header.session_id, SessionId(0x0042));
        assert_eq!(header.message_type, MessageType::Notification);

        let parsed = SdMessage::from_frame(&frame).unwrap();
        assert_eq!(original, parsed);
        // Encode(decode(frame)) is byte-exact.
        assert_eq!(parsed.to_frame(SessionId(0x0042)), frame);
    }

    #[test]
    fn test_frame_length_mismatch_fails() {
        let mut frame = subscribe_message().to_frame(SessionId(0x0001));
        frame.pop();
        assert!(matches!(
            SdMessage::from_frame(&frame),
            Err(SomeIpError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_sd_payload_too_short() {
        let data = vec![0u8; 11];
        assert!(matches!(
            SdMessage::from_bytes(&data),
            Err(SomeIpError::MessageTooShort { .. })
        ));
    }

    #[test]
    fn test_entries_length_overrun_fails() {
        let mut bytes = subscribe_message().to_bytes();
        // Inflate the entries length beyond the buffer.
        bytes[4..8].copy_from_slice(&0x1000u32.to_be_bytes());
        assert!(matches!(
            SdMessage::from_bytes(&bytes),
            Err(SomeIpError::SectionOverrun(_))
        ));
    }

    #[test]
    fn test_options_length_overrun_fails() {
        let msg = subscribe_message();
        let mut bytes = msg.to_bytes();
        let options_offset = 8 + msg.entries.len() * SD_ENTRY_SIZE;
        bytes[options_offset..options_offset + 4].copy_from_slice(&0x1000u32.to_be_bytes());
        assert!(matches!(
            SdMessage::from_bytes(&bytes),
            Err(SomeIpError::SectionOverrun(_))
        ));
    }

    #[test]
    fn test_unknown_entry_type_is_skipped() {
        let offer = ServiceEntry::offer_service(ServiceId(0x1234), InstanceId(0x0001), 1, 0, 3);
        let msg = SdMessage {
            flags: SdFlags::default(),
            entries: vec![SdEntry::Service(offer)],
            options: vec![],
        };
        let mut bytes = msg.to_bytes();
        // Append one more entry of unknown type 0x42.
        let mut unknown = [0u8; SD_ENTRY_SIZE];
        unknown[0] = 0x42;
        let insert_at = 8 + SD_ENTRY_SIZE;
        for (i, b) in unknown.iter().enumerate() {
            bytes.insert(insert_at + i, *b);
        }
        bytes[4..8].copy_from_slice(&((2 * SD_ENTRY_SIZE) as u32).to_be_bytes());

        let parsed = SdMessage::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.entries.len(), 1);
    }

    #[test]
    fn test_options_for_entry_out_of_range() {
        let mut msg = subscribe_message();
        if let SdEntry::Eventgroup(e) = &mut msg.entries[0] {
            e.num_options_1 = 2;
        }
        let entry = msg.entries[0].clone();
        assert!(msg.options_for_entry(&entry).is_err());
    }

    #[test]
    fn test_options_for_entry_resolves_runs() {
        let msg = subscribe_message();
        let entry = msg.entries[0].clone();
        let options = msg.options_for_entry(&entry).unwrap();
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].protocol(), Some(TransportProtocol::Udp));
    }

    #[test]
    fn test_session_counter_wraps_to_one() {
        let mut counter = SessionCounter::new();
        assert_eq!(counter.next(), SessionId(0x0001));
        assert_eq!(counter.next(), SessionId(0x0002));

        // Force the counter to the wrap point.
        let mut counter = SessionCounter { next: 0xFFFF };
        assert_eq!(counter.next(), SessionId(0xFFFF));
        assert_eq!(counter.next(), SessionId(0x0001));
        assert_eq!(counter.next(), SessionId(0x0002));
    }

    #[test]
    fn test_destination_sessions_are_independent() {
        let mut sessions = DestinationSessions::new();
        let a: SocketAddr = "192.0.2.10:30490".parse().unwrap();
        let b: SocketAddr = "192.0.2.11:30490".parse().unwrap();

        assert_eq!(sessions.next_for(a), SessionId(0x0001));
        assert_eq!(sessions.next_for(a), SessionId(0x0002));
        assert_eq!(sessions.next_for(b), SessionId(0x0001));
    }
}
