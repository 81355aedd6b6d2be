//! Dispatching of received SD entries to typed client events.
//!
//! One received SD frame can carry several entries; they are dispatched in
//! wire order. A malformed entry (bad option reference) is rejected with a
//! log and the remaining entries are still dispatched; framing errors fail
//! the whole frame.

use std::net::SocketAddr;

use tracing::{debug, error};

use crate::config::EndpointAddress;
use crate::error::Result;
use crate::header::ServiceId;

use super::entry::SdEntry;
use super::message::SdMessage;
use super::option::SdOption;
use super::types::{EntryType, EventgroupId, InstanceId, TransportProtocol};

/// The currently active service offer of a remote provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveOfferEntry {
    /// Unicast source address and port the offer was received from.
    pub sd_source: SocketAddr,
    /// Offered service ID.
    pub service_id: ServiceId,
    /// Offered instance ID (exact, never a wildcard).
    pub instance_id: InstanceId,
    /// Offered major version.
    pub major_version: u8,
    /// Offered minor version.
    pub minor_version: u32,
    /// Offer TTL in seconds.
    pub ttl: u32,
    /// TCP endpoint of the offerer, if present.
    pub tcp_endpoint: Option<EndpointAddress>,
    /// UDP endpoint of the offerer, if present.
    pub udp_endpoint: Option<EndpointAddress>,
    /// Whether the offer was received via multicast.
    pub is_multicast: bool,
}

impl ActiveOfferEntry {
    /// The remote unicast endpoints advertised by this offer.
    pub fn service_address(&self) -> crate::config::ServiceAddress {
        crate::config::ServiceAddress::new(self.tcp_endpoint, self.udp_endpoint)
    }
}

/// A typed event produced from one received SD entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdClientEvent {
    /// An OfferService entry with TTL > 0.
    OfferService(ActiveOfferEntry),
    /// An OfferService entry with TTL = 0.
    StopOfferService {
        /// Offered service ID.
        service_id: ServiceId,
        /// Offered instance ID.
        instance_id: InstanceId,
    },
    /// A SubscribeEventgroupAck entry with TTL > 0.
    SubscribeEventgroupAck {
        /// Service ID.
        service_id: ServiceId,
        /// Instance ID.
        instance_id: InstanceId,
        /// Acknowledged eventgroup.
        eventgroup_id: EventgroupId,
        /// Multicast endpoint assigned by the server, if any.
        multicast_endpoint: Option<EndpointAddress>,
    },
    /// A SubscribeEventgroupAck entry with TTL = 0 (NACK).
    SubscribeEventgroupNack {
        /// Service ID.
        service_id: ServiceId,
        /// Instance ID.
        instance_id: InstanceId,
        /// Rejected eventgroup.
        eventgroup_id: EventgroupId,
    },
}

/// Decode a full SD frame and dispatch its entries in order.
///
/// `source` is the unicast source address of the datagram; `is_multicast`
/// tells whether it was received via the SD multicast group.
pub fn dispatch_frame(
    data: &[u8],
    source: SocketAddr,
    is_multicast: bool,
) -> Result<Vec<SdClientEvent>> {
    let message = SdMessage::from_frame(data)?;
    Ok(dispatch_message(&message, source, is_multicast))
}

/// Dispatch the entries of a decoded SD message in order.
pub fn dispatch_message(
    message: &SdMessage,
    source: SocketAddr,
    is_multicast: bool,
) -> Vec<SdClientEvent> {
    let mut events = Vec::with_capacity(message.entries.len());

    for entry in &message.entries {
        let options = match message.options_for_entry(entry) {
            Ok(options) => options,
            Err(e) => {
                error!("Rejecting SD entry with unresolvable options: {e}");
                continue;
            }
        };

        match entry {
            SdEntry::Service(service) => match service.entry_type {
                EntryType::OfferService if service.ttl == 0 => {
                    events.push(SdClientEvent::StopOfferService {
                        service_id: service.service_id,
                        instance_id: service.instance_id,
                    });
                }
                EntryType::OfferService => {
                    let tcp_endpoint = find_unicast_endpoint(&options, TransportProtocol::Tcp);
                    let udp_endpoint = find_unicast_endpoint(&options, TransportProtocol::Udp);
                    events.push(SdClientEvent::OfferService(ActiveOfferEntry {
                        sd_source: source,
                        service_id: service.service_id,
                        instance_id: service.instance_id,
                        major_version: service.major_version,
                        minor_version: service.minor_version,
                        ttl: service.ttl,
                        tcp_endpoint,
                        udp_endpoint,
                        is_multicast,
                    }));
                }
                EntryType::FindService => {
                    // Finds are server-side business; the client core ignores them.
                    debug!("Ignoring FindService entry from {source}");
                }
                _ => {}
            },
            SdEntry::Eventgroup(eg) => match eg.entry_type {
                EntryType::SubscribeEventgroupAck if eg.ttl == 0 => {
                    events.push(SdClientEvent::SubscribeEventgroupNack {
                        service_id: eg.service_id,
                        instance_id: eg.instance_id,
                        eventgroup_id: eg.eventgroup_id,
                    });
                }
                EntryType::SubscribeEventgroupAck => {
                    let multicast_endpoint = options
                        .iter()
                        .find(|o| o.is_multicast())
                        .and_then(|o| o.endpoint_address());
                    events.push(SdClientEvent::SubscribeEventgroupAck {
                        service_id: eg.service_id,
                        instance_id: eg.instance_id,
                        eventgroup_id: eg.eventgroup_id,
                        multicast_endpoint,
                    });
                }
                EntryType::SubscribeEventgroup => {
                    // Subscriptions target the server side; ignore.
                    debug!("Ignoring SubscribeEventgroup entry from {source}");
                }
                _ => {}
            },
        }
    }

    events
}

fn find_unicast_endpoint(
    options: &[&SdOption],
    protocol: TransportProtocol,
) -> Option<EndpointAddress> {
    options
        .iter()
        .find(|o| !o.is_multicast() && o.protocol() == Some(protocol))
        .and_then(|o| o.endpoint_address())
}
