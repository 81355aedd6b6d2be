//! Multicast event reception for eventgroups.
//!
//! A RemoteServer joins the multicast group a provider assigns in a
//! SubscribeEventgroupAck (or, with static SD, in configuration). The join
//! and leave happen exactly once; the eventgroup manager gates calls on the
//! 0/1 transitions of its subscription count.

use std::cell::RefCell;
use std::net::IpAddr;
use std::rc::Rc;

use tracing::{debug, error};

use crate::config::EndpointAddress;
use crate::transport::{TransportFactory, UdpEndpoint};

struct JoinedGroup {
    endpoint: Box<dyn UdpEndpoint>,
    multicast_address: IpAddr,
}

/// Listener for multicast events of one required service instance.
pub struct EventMulticastListener {
    factory: Rc<RefCell<dyn TransportFactory>>,
    local_address: IpAddr,
    joined: Option<JoinedGroup>,
}

impl EventMulticastListener {
    /// Create a listener bound to the local interface address.
    pub fn new(factory: Rc<RefCell<dyn TransportFactory>>, local_address: IpAddr) -> Self {
        Self {
            factory,
            local_address,
            joined: None,
        }
    }

    /// Start listening for multicast events.
    ///
    /// `sender_address`/`sender_port` identify the provider's UDP endpoint;
    /// only its datagrams are accepted on the group. Returns false if the
    /// group could not be joined.
    pub fn start_listen_for_multicast_eventgroup(
        &mut self,
        multicast_address: IpAddr,
        multicast_port: u16,
        sender_address: IpAddr,
        sender_port: u16,
    ) -> bool {
        if self.joined.is_some() {
            // Already listening; the subscription count gating makes this a
            // renewal of an existing membership.
            return true;
        }

        let local = EndpointAddress::new(self.local_address, multicast_port);
        let mut endpoint = match self.factory.borrow_mut().get_udp_endpoint(local) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!("Failed to obtain UDP endpoint for multicast reception: {e}");
                return false;
            }
        };

        if let Err(e) = endpoint.join_multicast_group(multicast_address, sender_address, sender_port)
        {
            error!("Failed to join multicast group {multicast_address}: {e}");
            return false;
        }

        debug!("Joined multicast group {multicast_address}:{multicast_port}");
        self.joined = Some(JoinedGroup {
            endpoint,
            multicast_address,
        });
        true
    }

    /// Stop listening for multicast events, leaving the joined group.
    pub fn stop_listen_for_multicast_eventgroup(&mut self) {
        if let Some(mut joined) = self.joined.take() {
            if let Err(e) = joined.endpoint.leave_multicast_group(joined.multicast_address) {
                error!(
                    "Failed to leave multicast group {}: {e}",
                    joined.multicast_address
                );
            } else {
                debug!("Left multicast group {}", joined.multicast_address);
            }
        }
    }

    /// Whether a multicast group membership is active.
    pub fn is_listening(&self) -> bool {
        self.joined.is_some()
    }
}

impl Drop for EventMulticastListener {
    fn drop(&mut self) {
        self.stop_listen_for_multicast_eventgroup();
    }
}
