//! Already-parsed configuration value types for required service instances.
//!
//! Configuration loading and validation happen outside this crate; the types
//! here carry the validated values a RemoteServer is constructed with.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::header::{EventId, MethodId, ServiceId};
use crate::sd::types::{EventgroupId, InstanceId, TransportProtocol};

/// Identity of a service interface deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceDeploymentId {
    /// Service interface ID.
    pub service_id: ServiceId,
    /// Major interface version.
    pub major_version: u8,
    /// Minor interface version.
    pub minor_version: u32,
}

/// Identity of a service instance: deployment plus instance ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceInstanceId {
    /// The deployment identity.
    pub deployment_id: ServiceDeploymentId,
    /// The instance ID. `InstanceId::ANY` is only meaningful in find/subscribe contexts.
    pub instance_id: InstanceId,
}

/// A single IP endpoint (address + port, no protocol).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointAddress {
    /// IP address (v4 or v6).
    pub address: IpAddr,
    /// Port number. 0 denotes "dynamic/invalid"; never sent on the wire.
    pub port: u16,
}

impl EndpointAddress {
    /// Create a new endpoint address.
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self { address, port }
    }

    /// Check if the port is the dynamic/invalid marker.
    pub fn has_dynamic_port(&self) -> bool {
        self.port == 0
    }

    /// Convert to a socket address.
    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl From<SocketAddr> for EndpointAddress {
    fn from(addr: SocketAddr) -> Self {
        Self {
            address: addr.ip(),
            port: addr.port(),
        }
    }
}

impl std::fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Unicast TCP/UDP endpoints of a provided service instance.
///
/// At least one endpoint must be present for the service to be reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceAddress {
    /// Optional TCP endpoint.
    pub tcp_endpoint: Option<EndpointAddress>,
    /// Optional UDP endpoint.
    pub udp_endpoint: Option<EndpointAddress>,
}

impl ServiceAddress {
    /// Create a new service address.
    pub fn new(tcp_endpoint: Option<EndpointAddress>, udp_endpoint: Option<EndpointAddress>) -> Self {
        Self {
            tcp_endpoint,
            udp_endpoint,
        }
    }

    /// Check if any endpoint is present.
    pub fn is_reachable(&self) -> bool {
        self.tcp_endpoint.is_some() || self.udp_endpoint.is_some()
    }
}

/// Retry configuration for eventgroup subscription after a NACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeRetryConfig {
    /// Delay between retry attempts.
    pub delay: Duration,
    /// Maximum number of retry attempts after the initial subscription.
    pub max_retries: u8,
}

/// Timing configuration of a required eventgroup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventgroupTimingConfig {
    /// TTL in seconds carried in SubscribeEventgroup entries.
    pub ttl: u32,
    /// Optional request-response delay range (min, max).
    pub request_response_delay: Option<(Duration, Duration)>,
    /// Optional subscription retry configuration.
    pub retry: Option<SubscribeRetryConfig>,
}

/// Default TTL used when no timing configuration is present for an eventgroup.
pub const DEFAULT_SUBSCRIBE_TTL: u32 = 3;

/// Required eventgroups of one required service instance, with optional timing.
pub type RequiredEventgroups = BTreeMap<EventgroupId, Option<EventgroupTimingConfig>>;

/// Deployment of a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventDeployment {
    /// The event ID.
    pub event_id: EventId,
    /// Transport protocol the event is deployed on.
    pub transport_protocol: TransportProtocol,
    /// Whether the event has field (last-value cache) semantics.
    pub is_field: bool,
    /// Whether the event carries a signal-based (PDU) payload.
    pub is_signal_based: bool,
}

/// Deployment of an eventgroup: the set of events it carries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventgroupDeployment {
    /// Events contained in this eventgroup.
    pub events: Vec<EventId>,
}

/// Deployment of a single method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDeployment {
    /// The method ID.
    pub method_id: MethodId,
    /// Transport protocol method requests are sent on.
    pub transport_protocol: TransportProtocol,
}

/// Complete communication deployment of a service interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDeployment {
    /// The deployment identity.
    pub deployment_id: ServiceDeploymentId,
    /// All deployed events.
    pub events: Vec<EventDeployment>,
    /// Eventgroup composition.
    pub event_groups: BTreeMap<EventgroupId, EventgroupDeployment>,
    /// All deployed methods.
    pub methods: Vec<MethodDeployment>,
}

impl ServiceDeployment {
    /// Look up the deployment of an event.
    pub fn event(&self, event_id: EventId) -> Option<&EventDeployment> {
        self.events.iter().find(|e| e.event_id == event_id)
    }

    /// Look up the deployment of a method.
    pub fn method(&self, method_id: MethodId) -> Option<&MethodDeployment> {
        self.methods.iter().find(|m| m.method_id == method_id)
    }

    /// Find the eventgroup an event belongs to.
    pub fn eventgroup_of(&self, event_id: EventId) -> Option<EventgroupId> {
        self.event_groups
            .iter()
            .find(|(_, eg)| eg.events.contains(&event_id))
            .map(|(id, _)| *id)
    }

    /// Check if an eventgroup contains at least one event on the given protocol.
    pub fn eventgroup_contains_proto(&self, eventgroup_id: EventgroupId, proto: TransportProtocol) -> bool {
        self.event_groups
            .get(&eventgroup_id)
            .is_some_and(|eg| {
                eg.events.iter().any(|event_id| {
                    self.event(*event_id)
                        .is_some_and(|e| e.transport_protocol == proto)
                })
            })
    }

    /// Check if an eventgroup contains at least one field event.
    pub fn eventgroup_contains_field(&self, eventgroup_id: EventgroupId) -> bool {
        self.event_groups
            .get(&eventgroup_id)
            .is_some_and(|eg| {
                eg.events
                    .iter()
                    .any(|event_id| self.event(*event_id).is_some_and(|e| e.is_field))
            })
    }

    /// Check if any required event or any method uses the given protocol.
    ///
    /// Only events belonging to the required eventgroups count.
    pub fn requires_protocol(&self, required_eventgroups: &RequiredEventgroups, proto: TransportProtocol) -> bool {
        let event_requires = required_eventgroups
            .keys()
            .any(|eg_id| self.eventgroup_contains_proto(*eg_id, proto));
        let method_requires = self.methods.iter().any(|m| m.transport_protocol == proto);
        event_requires || method_requires
    }
}

/// Local network endpoint configuration of a required service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredNetworkEndpoint {
    /// Local IP address.
    pub address: IpAddr,
    /// Local TCP port, if TCP communication is configured.
    pub tcp_port: Option<u16>,
    /// Local UDP port, if UDP communication is configured.
    pub udp_port: Option<u16>,
}

impl RequiredNetworkEndpoint {
    /// The local UDP endpoint, if a UDP port is configured.
    pub fn udp_endpoint(&self) -> Option<EndpointAddress> {
        self.udp_port.map(|port| EndpointAddress::new(self.address, port))
    }

    /// The local TCP endpoint, if a TCP port is configured.
    pub fn tcp_endpoint(&self) -> Option<EndpointAddress> {
        self.tcp_port.map(|port| EndpointAddress::new(self.address, port))
    }
}
