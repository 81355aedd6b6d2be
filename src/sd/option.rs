//! SOME/IP-SD endpoint option codec.
//!
//! Every option starts with a 4-byte header: length (u16 BE), type (u8) and
//! flags (u8). The flags byte counts towards `length`, so `length - 1`
//! payload bytes follow the header. Bit 0 of the flags byte marks the option
//! as discardable: unknown discardable options are skipped, unknown
//! non-discardable options fail the message.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::config::EndpointAddress;
use crate::error::{Result, SomeIpError};

use super::types::{OptionType, TransportProtocol, SD_OPTION_HEADER_SIZE};

/// Wire length field value of an IPv4 endpoint option.
pub const IPV4_OPTION_LENGTH: u16 = 0x0009;

/// Wire length field value of an IPv6 endpoint option.
pub const IPV6_OPTION_LENGTH: u16 = 0x0015;

/// IPv4 endpoint option payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4EndpointOption {
    /// IPv4 address.
    pub address: Ipv4Addr,
    /// Transport protocol (TCP or UDP).
    pub protocol: TransportProtocol,
    /// Port number.
    pub port: u16,
    /// Discardable flag (bit 0 of the option flags byte).
    pub discardable: bool,
}

impl Ipv4EndpointOption {
    /// Payload size following the option header (length - 1).
    pub const DATA_SIZE: usize = 8;

    /// Create a new non-discardable IPv4 endpoint option.
    pub fn new(address: Ipv4Addr, protocol: TransportProtocol, port: u16) -> Self {
        Self {
            address,
            protocol,
            port,
            discardable: false,
        }
    }

    /// Parse from payload bytes (after the option header).
    pub fn from_bytes(data: &[u8], discardable: bool) -> Result<Self> {
        if data.len() < Self::DATA_SIZE {
            return Err(SomeIpError::MessageTooShort {
                expected: Self::DATA_SIZE,
                actual: data.len(),
            });
        }

        let address = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
        // data[4] is reserved
        let protocol =
            TransportProtocol::from_u8(data[5]).ok_or(SomeIpError::UnknownProtocol(data[5]))?;
        let port = u16::from_be_bytes([data[6], data[7]]);

        Ok(Self {
            address,
            protocol,
            port,
            discardable,
        })
    }

    /// Serialize payload bytes (after the option header).
    pub fn to_bytes(&self) -> [u8; Self::DATA_SIZE] {
        let mut buf = [0u8; Self::DATA_SIZE];
        buf[0..4].copy_from_slice(&self.address.octets());
        buf[4] = 0; // Reserved
        buf[5] = self.protocol as u8;
        buf[6..8].copy_from_slice(&self.port.to_be_bytes());
        buf
    }
}

/// IPv6 endpoint option payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6EndpointOption {
    /// IPv6 address.
    pub address: Ipv6Addr,
    /// Transport protocol (TCP or UDP).
    pub protocol: TransportProtocol,
    /// Port number.
    pub port: u16,
    /// Discardable flag (bit 0 of the option flags byte).
    pub discardable: bool,
}

impl Ipv6EndpointOption {
    /// Payload size following the option header (length - 1).
    pub const DATA_SIZE: usize = 20;

    /// Create a new non-discardable IPv6 endpoint option.
    pub fn new(address: Ipv6Addr, protocol: TransportProtocol, port: u16) -> Self {
        Self {
            address,
            protocol,
            port,
            discardable: false,
        }
    }

    /// Parse from payload bytes (after the option header).
    pub fn from_bytes(data: &[u8], discardable: bool) -> Result<Self> {
        if data.len() < Self::DATA_SIZE {
            return Err(SomeIpError::MessageTooShort {
                expected: Self::DATA_SIZE,
                actual: data.len(),
            });
        }

        let mut addr_bytes = [0u8; 16];
        addr_bytes.copy_from_slice(&data[0..16]);
        let address = Ipv6Addr::from(addr_bytes);
        // data[16] is reserved
        let protocol =
            TransportProtocol::from_u8(data[17]).ok_or(SomeIpError::UnknownProtocol(data[17]))?;
        let port = u16::from_be_bytes([data[18], data[19]]);

        Ok(Self {
            address,
            protocol,
            port,
            discardable,
        })
    }

    /// Serialize payload bytes (after the option header).
    pub fn to_bytes(&self) -> [u8; Self::DATA_SIZE] {
        let mut buf = [0u8; Self::DATA_SIZE];
        buf[0..16].copy_from_slice(&self.address.octets());
        buf[16] = 0; // Reserved
        buf[17] = self.protocol as u8;
        buf[18..20].copy_from_slice(&self.port.to_be_bytes());
        buf
    }
}

/// A decoded SD option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdOption {
    /// IPv4 unicast endpoint option.
    IPv4Endpoint(Ipv4EndpointOption),
    /// IPv6 unicast endpoint option.
    IPv6Endpoint(Ipv6EndpointOption),
    /// IPv4 multicast option.
    IPv4Multicast(Ipv4EndpointOption),
    /// IPv6 multicast option.
    IPv6Multicast(Ipv6EndpointOption),
    /// Unknown discardable option, kept to preserve option indices and
    /// round-tripping. Consumers ignore it.
    Unknown {
        /// Raw option type byte.
        option_type: u8,
        /// Raw flags byte (bit 0 is set, or decoding would have failed).
        flags: u8,
        /// Payload bytes following the flags byte.
        data: Vec<u8>,
    },
}

impl SdOption {
    /// Build a unicast endpoint option from an address and protocol.
    pub fn endpoint(endpoint: EndpointAddress, protocol: TransportProtocol) -> Self {
        match endpoint.address {
            IpAddr::V4(addr) => Self::IPv4Endpoint(Ipv4EndpointOption::new(addr, protocol, endpoint.port)),
            IpAddr::V6(addr) => Self::IPv6Endpoint(Ipv6EndpointOption::new(addr, protocol, endpoint.port)),
        }
    }

    /// Build a multicast option from an address. Multicast events are always UDP.
    pub fn multicast(endpoint: EndpointAddress) -> Self {
        match endpoint.address {
            IpAddr::V4(addr) => {
                Self::IPv4Multicast(Ipv4EndpointOption::new(addr, TransportProtocol::Udp, endpoint.port))
            }
            IpAddr::V6(addr) => {
                Self::IPv6Multicast(Ipv6EndpointOption::new(addr, TransportProtocol::Udp, endpoint.port))
            }
        }
    }

    /// Parse one option from bytes (including the header).
    ///
    /// Returns the decoded option and the number of bytes consumed. Unknown
    /// discardable options decode to [`SdOption::Unknown`]; unknown
    /// non-discardable options fail. The caller is responsible for bounding
    /// `data` to the options section.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < SD_OPTION_HEADER_SIZE {
            return Err(SomeIpError::MessageTooShort {
                expected: SD_OPTION_HEADER_SIZE,
                actual: data.len(),
            });
        }

        let length = u16::from_be_bytes([data[0], data[1]]) as usize;
        let option_type_byte = data[2];
        let flags = data[3];
        let discardable = (flags & 0x01) != 0;

        if length == 0 {
            return Err(SomeIpError::section_overrun("Option length 0"));
        }

        // The flags byte is part of the declared length.
        let total_size = SD_OPTION_HEADER_SIZE + length - 1;
        if data.len() < total_size {
            return Err(SomeIpError::section_overrun(format!(
                "Option length {length} exceeds remaining {} bytes",
                data.len() - 3
            )));
        }

        let option_data = &data[SD_OPTION_HEADER_SIZE..total_size];

        let check_length = |expected: u16| -> Result<()> {
            if length != expected as usize {
                return Err(SomeIpError::invalid_header(format!(
                    "Endpoint option type 0x{option_type_byte:02X} with length {length}, expected {expected}"
                )));
            }
            Ok(())
        };

        let option = match OptionType::from_u8(option_type_byte) {
            Some(OptionType::IPv4Endpoint) => {
                check_length(IPV4_OPTION_LENGTH)?;
                SdOption::IPv4Endpoint(Ipv4EndpointOption::from_bytes(option_data, discardable)?)
            }
            Some(OptionType::IPv6Endpoint) => {
                check_length(IPV6_OPTION_LENGTH)?;
                SdOption::IPv6Endpoint(Ipv6EndpointOption::from_bytes(option_data, discardable)?)
            }
            Some(OptionType::IPv4Multicast) => {
                check_length(IPV4_OPTION_LENGTH)?;
                SdOption::IPv4Multicast(Ipv4EndpointOption::from_bytes(option_data, discardable)?)
            }
            Some(OptionType::IPv6Multicast) => {
                check_length(IPV6_OPTION_LENGTH)?;
                SdOption::IPv6Multicast(Ipv6EndpointOption::from_bytes(option_data, discardable)?)
            }
            None if discardable => SdOption::Unknown {
                option_type: option_type_byte,
                flags,
                data: option_data.to_vec(),
            },
            None => return Err(SomeIpError::UnknownOption(option_type_byte)),
        };

        Ok((option, total_size))
    }

    /// Serialize the option to bytes (including the header).
    pub fn to_bytes(&self) -> Vec<u8> {
        let (option_type, flags, data): (u8, u8, Vec<u8>) = match self {
            SdOption::IPv4Endpoint(opt) => (
                OptionType::IPv4Endpoint as u8,
                opt.discardable as u8,
                opt.to_bytes().to_vec(),
            ),
            SdOption::IPv6Endpoint(opt) => (
                OptionType::IPv6Endpoint as u8,
                opt.discardable as u8,
                opt.to_bytes().to_vec(),
            ),
            SdOption::IPv4Multicast(opt) => (
                OptionType::IPv4Multicast as u8,
                opt.discardable as u8,
                opt.to_bytes().to_vec(),
            ),
            SdOption::IPv6Multicast(opt) => (
                OptionType::IPv6Multicast as u8,
                opt.discardable as u8,
                opt.to_bytes().to_vec(),
            ),
            SdOption::Unknown {
                option_type,
                flags,
                data,
            } => (*option_type, *flags, data.clone()),
        };

        // length counts the flags byte plus the payload.
        let length = (data.len() + 1) as u16;
        let mut buf = Vec::with_capacity(SD_OPTION_HEADER_SIZE + data.len());
        buf.extend_from_slice(&length.to_be_bytes());
        buf.push(option_type);
        buf.push(flags);
        buf.extend_from_slice(&data);

        buf
    }

    /// Get the option type, if recognized.
    pub fn option_type(&self) -> Option<OptionType> {
        match self {
            SdOption::IPv4Endpoint(_) => Some(OptionType::IPv4Endpoint),
            SdOption::IPv6Endpoint(_) => Some(OptionType::IPv6Endpoint),
            SdOption::IPv4Multicast(_) => Some(OptionType::IPv4Multicast),
            SdOption::IPv6Multicast(_) => Some(OptionType::IPv6Multicast),
            SdOption::Unknown { .. } => None,
        }
    }

    /// Check if this is a multicast option.
    pub fn is_multicast(&self) -> bool {
        self.option_type().is_some_and(|t| t.is_multicast())
    }

    /// The endpoint address carried by this option, if it is an endpoint option.
    pub fn endpoint_address(&self) -> Option<EndpointAddress> {
        match self {
            SdOption::IPv4Endpoint(opt) | SdOption::IPv4Multicast(opt) => {
                Some(EndpointAddress::new(IpAddr::V4(opt.address), opt.port))
            }
            SdOption::IPv6Endpoint(opt) | SdOption::IPv6Multicast(opt) => {
                Some(EndpointAddress::new(IpAddr::V6(opt.address), opt.port))
            }
            SdOption::Unknown { .. } => None,
        }
    }

    /// The transport protocol carried by this option, if it is an endpoint option.
    pub fn protocol(&self) -> Option<TransportProtocol> {
        match self {
            SdOption::IPv4Endpoint(opt) | SdOption::IPv4Multicast(opt) => Some(opt.protocol),
            SdOption::IPv6Endpoint(opt) | SdOption::IPv6Multicast(opt) => Some(opt.protocol),
            SdOption::Unknown { .. } => None,
        }
    }
}
