//! Typed eventgroup subscription entries.
//!
//! These records carry the endpoint options that accompany the wire entry.
//! Lowering to an [`SdMessage`] is deterministic: the TCP option precedes
//! the UDP option and options are referenced as a first run only.

use crate::config::EndpointAddress;
use crate::header::ServiceId;

use super::entry::{EventgroupEntry, SdEntry};
use super::message::SdMessage;
use super::option::SdOption;
use super::types::{EventgroupId, InstanceId, TransportProtocol};

/// A typed SubscribeEventgroup entry with its endpoint options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeEventgroupEntry {
    /// Service ID of the offered instance.
    pub service_id: ServiceId,
    /// Exact instance ID of the offered instance (never a wildcard).
    pub instance_id: InstanceId,
    /// Major version of the offered instance.
    pub major_version: u8,
    /// The eventgroup to subscribe to.
    pub eventgroup_id: EventgroupId,
    /// Subscription TTL in seconds.
    pub ttl: u32,
    /// Subscription counter (4 bits).
    pub counter: u8,
    /// Local TCP endpoint option, if the eventgroup carries TCP events.
    pub tcp_endpoint: Option<EndpointAddress>,
    /// Local UDP endpoint option, if the eventgroup carries UDP events.
    pub udp_endpoint: Option<EndpointAddress>,
}

impl SubscribeEventgroupEntry {
    /// Lower to an SD message containing this entry and its options.
    pub fn to_message(&self) -> SdMessage {
        lower(self, self.ttl)
    }
}

/// A typed StopSubscribeEventgroup entry.
///
/// Carries the same option set as the Subscribe it cancels; only the TTL
/// differs on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopSubscribeEventgroupEntry {
    /// Service ID of the offered instance.
    pub service_id: ServiceId,
    /// Exact instance ID of the offered instance (never a wildcard).
    pub instance_id: InstanceId,
    /// Major version of the offered instance.
    pub major_version: u8,
    /// The eventgroup to stop subscribing to.
    pub eventgroup_id: EventgroupId,
    /// Subscription counter (4 bits).
    pub counter: u8,
    /// Local TCP endpoint option, if the eventgroup carries TCP events.
    pub tcp_endpoint: Option<EndpointAddress>,
    /// Local UDP endpoint option, if the eventgroup carries UDP events.
    pub udp_endpoint: Option<EndpointAddress>,
}

impl StopSubscribeEventgroupEntry {
    /// Lower to an SD message containing this entry and its options.
    pub fn to_message(&self) -> SdMessage {
        let subscribe = SubscribeEventgroupEntry {
            service_id: self.service_id,
            instance_id: self.instance_id,
            major_version: self.major_version,
            eventgroup_id: self.eventgroup_id,
            ttl: 0,
            counter: self.counter,
            tcp_endpoint: self.tcp_endpoint,
            udp_endpoint: self.udp_endpoint,
        };
        lower(&subscribe, 0)
    }
}

fn lower(entry: &SubscribeEventgroupEntry, ttl: u32) -> SdMessage {
    let mut options = Vec::with_capacity(2);
    if let Some(tcp) = entry.tcp_endpoint {
        options.push(SdOption::endpoint(tcp, TransportProtocol::Tcp));
    }
    if let Some(udp) = entry.udp_endpoint {
        options.push(SdOption::endpoint(udp, TransportProtocol::Udp));
    }

    let mut wire = EventgroupEntry::subscribe(
        entry.service_id,
        entry.instance_id,
        entry.major_version,
        entry.eventgroup_id,
        ttl,
    );
    wire.counter = entry.counter;
    wire.index_first_option = 0;
    wire.num_options_1 = options.len() as u8;

    SdMessage {
        flags: super::message::SdFlags::default(),
        entries: vec![SdEntry::Eventgroup(wire)],
        options,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sd::types::OptionType;
    use std::net::{IpAddr, Ipv4Addr};

    fn entry() -> SubscribeEventgroupEntry {
        SubscribeEventgroupEntry {
            service_id: ServiceId(0x1234),
            instance_id: InstanceId(0x0001),
            major_version: 1,
            eventgroup_id: EventgroupId(0x0010),
            ttl: 3,
            counter: 0,
            tcp_endpoint: Some(EndpointAddress::new(
                IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
                40000,
            )),
            udp_endpoint: Some(EndpointAddress::new(
                IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
                30501,
            )),
        }
    }

    #[test]
    fn test_lowering_orders_tcp_before_udp() {
        let msg = entry().to_message();
        assert_eq!(msg.options.len(), 2);
        assert_eq!(msg.options[0].protocol(), Some(TransportProtocol::Tcp));
        assert_eq!(msg.options[1].protocol(), Some(TransportProtocol::Udp));
        assert_eq!(msg.options[0].option_type(), Some(OptionType::IPv4Endpoint));
    }

    #[test]
    fn test_lowering_references_first_run_only() {
        let msg = entry().to_message();
        let SdEntry::Eventgroup(wire) = &msg.entries[0] else {
            panic!("expected eventgroup entry");
        };
        assert_eq!(wire.index_first_option, 0);
        assert_eq!(wire.num_options_1, 2);
        assert_eq!(wire.index_second_option, 0);
        assert_eq!(wire.num_options_2, 0);
        assert_eq!(wire.ttl, 3);
    }

    #[test]
    fn test_udp_only_entry_has_single_option() {
        let mut e = entry();
        e.tcp_endpoint = None;
        let msg = e.to_message();
        assert_eq!(msg.options.len(), 1);
        assert_eq!(msg.options[0].protocol(), Some(TransportProtocol::Udp));
    }

    #[test]
    fn test_stop_entry_carries_same_options_with_zero_ttl() {
        let e = entry();
        let stop = StopSubscribeEventgroupEntry {
            service_id: e.service_id,
            instance_id: e.instance_id,
            major_version: e.major_version,
            eventgroup_id: e.eventgroup_id,
            counter: e.counter,
            tcp_endpoint: e.tcp_endpoint,
            udp_endpoint: e.udp_endpoint,
        };
        let msg = stop.to_message();
        assert_eq!(msg.options, e.to_message().options);
        let SdEntry::Eventgroup(wire) = &msg.entries[0] else {
            panic!("expected eventgroup entry");
        };
        assert_eq!(wire.ttl, 0);
        assert!(wire.is_negative());
    }
}
