//! Builder for eventgroup subscription SD entries.
//!
//! Produces typed SubscribeEventgroup / StopSubscribeEventgroup records with
//! the endpoint option set required by the eventgroup's deployment. Entry
//! identity (service, instance, major version) always comes from the active
//! offer, never from configuration wildcards.

use crate::config::{
    EndpointAddress, RequiredEventgroups, ServiceAddress, ServiceDeployment, DEFAULT_SUBSCRIBE_TTL,
};
use crate::error::{Result, SomeIpError};
use crate::sd::dispatch::ActiveOfferEntry;
use crate::sd::entries::{StopSubscribeEventgroupEntry, SubscribeEventgroupEntry};
use crate::sd::types::{EventgroupId, TransportProtocol};

/// Builder for eventgroup subscription entries of one required service instance.
#[derive(Debug)]
pub struct EventgroupSdMessageBuilder {
    deployment: ServiceDeployment,
    required_eventgroups: RequiredEventgroups,
    /// Local TCP endpoint for event reception. Registered once after TCP
    /// connection establishment, unless a custom endpoint pins it.
    local_tcp_endpoint: Option<EndpointAddress>,
    /// Local UDP endpoint for event reception.
    local_udp_endpoint: Option<EndpointAddress>,
    /// When a custom TCP address is configured, the endpoint assigned by the
    /// OS during connection establishment is ignored.
    custom_tcp_address_set: bool,
}

impl EventgroupSdMessageBuilder {
    /// Create a builder.
    ///
    /// `udp_endpoint` is the configured local UDP endpoint, if any.
    /// `custom_subscription_endpoints` replace the configured/assigned
    /// endpoints per protocol when present.
    pub fn new(
        deployment: ServiceDeployment,
        udp_endpoint: Option<EndpointAddress>,
        required_eventgroups: RequiredEventgroups,
        custom_subscription_endpoints: ServiceAddress,
    ) -> Self {
        let custom_tcp_address_set = custom_subscription_endpoints.tcp_endpoint.is_some();
        let local_tcp_endpoint = custom_subscription_endpoints.tcp_endpoint;
        let local_udp_endpoint = custom_subscription_endpoints.udp_endpoint.or(udp_endpoint);

        Self {
            deployment,
            required_eventgroups,
            local_tcp_endpoint,
            local_udp_endpoint,
            custom_tcp_address_set,
        }
    }

    /// Register the local TCP endpoint assigned during connection establishment.
    ///
    /// Ignored when a custom TCP subscription endpoint is configured.
    pub fn register_local_tcp_endpoint(&mut self, endpoint: EndpointAddress) {
        if !self.custom_tcp_address_set {
            self.local_tcp_endpoint = Some(endpoint);
        }
    }

    /// Build a SubscribeEventgroup entry for the given eventgroup.
    ///
    /// Fails when the eventgroup carries TCP events but no local TCP
    /// endpoint has been registered yet.
    pub fn make_subscribe_eventgroup_entry(
        &self,
        eventgroup_id: EventgroupId,
        offer: &ActiveOfferEntry,
    ) -> Result<SubscribeEventgroupEntry> {
        let (tcp_endpoint, udp_endpoint) = self.endpoint_options(eventgroup_id)?;

        Ok(SubscribeEventgroupEntry {
            service_id: offer.service_id,
            instance_id: offer.instance_id,
            major_version: offer.major_version,
            eventgroup_id,
            ttl: self.subscribe_ttl(eventgroup_id),
            counter: 0,
            tcp_endpoint,
            udp_endpoint,
        })
    }

    /// Build a StopSubscribeEventgroup entry for the given eventgroup.
    ///
    /// Carries the same option set as the Subscribe it cancels.
    pub fn make_stop_subscribe_eventgroup_entry(
        &self,
        eventgroup_id: EventgroupId,
        offer: &ActiveOfferEntry,
    ) -> Result<StopSubscribeEventgroupEntry> {
        let (tcp_endpoint, udp_endpoint) = self.endpoint_options(eventgroup_id)?;

        Ok(StopSubscribeEventgroupEntry {
            service_id: offer.service_id,
            instance_id: offer.instance_id,
            major_version: offer.major_version,
            eventgroup_id,
            counter: 0,
            tcp_endpoint,
            udp_endpoint,
        })
    }

    fn endpoint_options(
        &self,
        eventgroup_id: EventgroupId,
    ) -> Result<(Option<EndpointAddress>, Option<EndpointAddress>)> {
        let needs_tcp = self
            .deployment
            .eventgroup_contains_proto(eventgroup_id, TransportProtocol::Tcp);
        let needs_udp = self
            .deployment
            .eventgroup_contains_proto(eventgroup_id, TransportProtocol::Udp);

        let tcp_endpoint = if needs_tcp {
            match self.local_tcp_endpoint {
                Some(endpoint) => Some(endpoint),
                None => return Err(SomeIpError::EndpointNotRegistered("tcp")),
            }
        } else {
            None
        };

        let udp_endpoint = if needs_udp { self.local_udp_endpoint } else { None };

        Ok((tcp_endpoint, udp_endpoint))
    }

    fn subscribe_ttl(&self, eventgroup_id: EventgroupId) -> u32 {
        self.required_eventgroups
            .get(&eventgroup_id)
            .and_then(|timing| timing.map(|t| t.ttl))
            .unwrap_or(DEFAULT_SUBSCRIBE_TTL)
    }
}
