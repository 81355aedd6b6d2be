//! SOME/IP-SD type definitions.

/// SD Service ID (always 0xFFFF).
pub const SD_SERVICE_ID: u16 = 0xFFFF;

/// SD Method ID (always 0x8100).
pub const SD_METHOD_ID: u16 = 0x8100;

/// SD Client ID (always 0x0000).
pub const SD_CLIENT_ID: u16 = 0x0000;

/// SD interface version (always 0x01).
pub const SD_INTERFACE_VERSION: u8 = 0x01;

/// Size of an SD entry in bytes.
pub const SD_ENTRY_SIZE: usize = 16;

/// Size of an SD option header in bytes (length + type + flags).
pub const SD_OPTION_HEADER_SIZE: usize = 4;

/// Maximum size of an SD message datagram in bytes.
pub const MAX_SD_MESSAGE_SIZE: usize = 1392;

/// Instance ID for a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct InstanceId(pub u16);

impl InstanceId {
    /// Wildcard instance ID that matches any instance.
    ///
    /// Only meaningful in find/subscribe contexts; outgoing subscription
    /// entries always carry the exact offered instance ID.
    pub const ANY: InstanceId = InstanceId(0xFFFF);

    /// Check if this is the wildcard instance ID.
    pub fn is_any(&self) -> bool {
        self.0 == 0xFFFF
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Eventgroup ID for event subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct EventgroupId(pub u16);

impl std::fmt::Display for EventgroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// SD entry types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntryType {
    /// Find a service.
    FindService = 0x00,
    /// Offer a service (TTL > 0) or stop offering (TTL = 0).
    OfferService = 0x01,
    /// Subscribe to an eventgroup (TTL > 0) or unsubscribe (TTL = 0).
    SubscribeEventgroup = 0x06,
    /// Acknowledge (TTL > 0) or reject (TTL = 0) a subscription.
    SubscribeEventgroupAck = 0x07,
}

impl EntryType {
    /// Create an EntryType from a raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::FindService),
            0x01 => Some(Self::OfferService),
            0x06 => Some(Self::SubscribeEventgroup),
            0x07 => Some(Self::SubscribeEventgroupAck),
            _ => None,
        }
    }

    /// Check if this is a service entry type.
    pub fn is_service_entry(&self) -> bool {
        matches!(self, Self::FindService | Self::OfferService)
    }

    /// Check if this is an eventgroup entry type.
    pub fn is_eventgroup_entry(&self) -> bool {
        matches!(self, Self::SubscribeEventgroup | Self::SubscribeEventgroupAck)
    }
}

/// SD endpoint option types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OptionType {
    /// IPv4 endpoint option.
    IPv4Endpoint = 0x04,
    /// IPv6 endpoint option.
    IPv6Endpoint = 0x06,
    /// IPv4 multicast option.
    IPv4Multicast = 0x14,
    /// IPv6 multicast option.
    IPv6Multicast = 0x16,
}

impl OptionType {
    /// Create an OptionType from a raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x04 => Some(Self::IPv4Endpoint),
            0x06 => Some(Self::IPv6Endpoint),
            0x14 => Some(Self::IPv4Multicast),
            0x16 => Some(Self::IPv6Multicast),
            _ => None,
        }
    }

    /// Check if this is a multicast option.
    pub fn is_multicast(&self) -> bool {
        matches!(self, Self::IPv4Multicast | Self::IPv6Multicast)
    }
}

/// Transport protocol used for endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransportProtocol {
    /// TCP protocol.
    Tcp = 0x06,
    /// UDP protocol.
    Udp = 0x11,
}

impl TransportProtocol {
    /// Create a TransportProtocol from a raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x06 => Some(Self::Tcp),
            0x11 => Some(Self::Udp),
            _ => None,
        }
    }
}
