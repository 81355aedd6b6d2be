//! Transport connection management for one RemoteServer.
//!
//! Establishes the TCP and/or UDP senders a required service instance needs
//! and folds the per-protocol connection states into one aggregate state.
//! Connection state changes are reported by the daemon's transport layer and
//! routed here through the owning RemoteServer.

use tracing::{debug, error};

use crate::config::{EndpointAddress, RequiredNetworkEndpoint, ServiceAddress};
use crate::error::{Result, SomeIpError};
use crate::message::Packet;
use crate::sd::types::TransportProtocol;
use crate::transport::{ConnectionState, TcpSender, TransportFactory, UdpSender};

/// Aggregate connection state transition observed after a per-protocol
/// state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateTransition {
    /// The aggregate state became Connected.
    Established,
    /// The aggregate state left Connected.
    Closed,
}

/// Connection manager of one RemoteServer.
pub struct RemoteServerConnectionManager {
    tcp_sender: Option<Box<dyn TcpSender>>,
    udp_sender: Option<Box<dyn UdpSender>>,
    tcp_state: ConnectionState,
    udp_state: ConnectionState,
    tcp_required: bool,
    udp_required: bool,
}

impl RemoteServerConnectionManager {
    /// Create the connection manager, constructing every required sender.
    ///
    /// Fails when a required sender cannot be constructed, e.g. when the
    /// offer lacks the endpoint of a required protocol.
    pub fn new(
        factory: &mut dyn TransportFactory,
        network: &RequiredNetworkEndpoint,
        remote: &ServiceAddress,
        tcp_required: bool,
        udp_required: bool,
    ) -> Result<Self> {
        let mut tcp_sender = None;
        let mut udp_sender = None;
        let mut tcp_state = ConnectionState::Disconnected;
        let mut udp_state = ConnectionState::Disconnected;

        if tcp_required {
            let local = network
                .tcp_endpoint()
                .ok_or(SomeIpError::ConnectionNotAvailable)?;
            let remote_tcp = remote.tcp_endpoint.ok_or_else(|| {
                error!("TCP connection required but the offer carries no TCP endpoint");
                SomeIpError::ConnectionNotAvailable
            })?;
            let sender = factory.get_tcp_sender(local, remote_tcp)?;
            tcp_state = sender.connection_state();
            tcp_sender = Some(sender);
        }

        if udp_required {
            let local = network
                .udp_endpoint()
                .ok_or(SomeIpError::ConnectionNotAvailable)?;
            let remote_udp = remote.udp_endpoint.ok_or_else(|| {
                error!("UDP connection required but the offer carries no UDP endpoint");
                SomeIpError::ConnectionNotAvailable
            })?;
            let sender = factory.get_udp_sender(local, remote_udp)?;
            udp_state = sender.connection_state();
            udp_sender = Some(sender);
        }

        Ok(Self {
            tcp_sender,
            udp_sender,
            tcp_state,
            udp_state,
            tcp_required,
            udp_required,
        })
    }

    /// The locally bound TCP endpoint, once the TCP sender exists.
    pub fn local_tcp_endpoint(&self) -> Option<EndpointAddress> {
        self.tcp_sender.as_ref().map(|s| s.local_endpoint())
    }

    /// The aggregate connection state.
    ///
    /// With both protocols required the aggregate is Connected only when
    /// both are, Disconnected when at least one is, Connecting otherwise.
    pub fn connection_state(&self) -> ConnectionState {
        match (self.tcp_required, self.udp_required) {
            (true, false) => self.tcp_state,
            (false, true) => self.udp_state,
            (true, true) => {
                if self.tcp_state == ConnectionState::Connected
                    && self.udp_state == ConnectionState::Connected
                {
                    ConnectionState::Connected
                } else if self.tcp_state == ConnectionState::Disconnected
                    || self.udp_state == ConnectionState::Disconnected
                {
                    ConnectionState::Disconnected
                } else {
                    // At least one Connecting, the other Connected.
                    ConnectionState::Connecting
                }
            }
            (false, false) => ConnectionState::Disconnected,
        }
    }

    /// A per-protocol connection state change reported by the transport.
    ///
    /// Returns the aggregate transition, if any.
    pub fn on_connection_state_change(
        &mut self,
        protocol: TransportProtocol,
        state: ConnectionState,
    ) -> Option<AggregateTransition> {
        let before = self.connection_state();
        match protocol {
            TransportProtocol::Tcp => self.tcp_state = state,
            TransportProtocol::Udp => self.udp_state = state,
        }
        let after = self.connection_state();

        debug!("Connection state change: {protocol:?} -> {state:?} (aggregate {before:?} -> {after:?})");

        if before != ConnectionState::Connected && after == ConnectionState::Connected {
            Some(AggregateTransition::Established)
        } else if before == ConnectionState::Connected && after != ConnectionState::Connected {
            Some(AggregateTransition::Closed)
        } else {
            None
        }
    }

    /// Send a method request over the given protocol.
    pub fn send_request(&mut self, protocol: TransportProtocol, packet: &Packet) -> Result<()> {
        let result = match protocol {
            TransportProtocol::Tcp => match &mut self.tcp_sender {
                Some(sender) => sender.send(packet),
                None => return Err(SomeIpError::ConnectionNotAvailable),
            },
            TransportProtocol::Udp => match &mut self.udp_sender {
                Some(sender) => sender.send(packet),
                None => return Err(SomeIpError::ConnectionNotAvailable),
            },
        };

        result.map_err(|e| {
            error!("Transport send failed: {e}");
            SomeIpError::ConnectionTransmissionFailed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::{FakeTransportFactory, SenderState};
    use crate::header::{MethodId, ServiceId};
    use crate::message::SomeIpMessage;
    use std::net::{IpAddr, Ipv4Addr};

    fn network() -> RequiredNetworkEndpoint {
        RequiredNetworkEndpoint {
            address: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
            tcp_port: Some(40000),
            udp_port: Some(30501),
        }
    }

    fn remote(tcp: bool, udp: bool) -> ServiceAddress {
        ServiceAddress::new(
            tcp.then(|| EndpointAddress::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)), 30509)),
            udp.then(|| EndpointAddress::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)), 30500)),
        )
    }

    fn factory_with(
        tcp: ConnectionState,
        udp: ConnectionState,
    ) -> FakeTransportFactory {
        let local_tcp = EndpointAddress::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 40000);
        let local_udp = EndpointAddress::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 30501);
        FakeTransportFactory {
            tcp_state: Some(SenderState::new(tcp, local_tcp)),
            udp_state: Some(SenderState::new(udp, local_udp)),
            ..FakeTransportFactory::default()
        }
    }

    fn packet() -> Packet {
        Packet::new(SomeIpMessage::request(ServiceId(0x1234), MethodId(0x0001)).build())
    }

    #[test]
    fn test_single_protocol_aggregate_follows_that_protocol() {
        let mut factory = factory_with(ConnectionState::Disconnected, ConnectionState::Connected);
        let manager =
            RemoteServerConnectionManager::new(&mut factory, &network(), &remote(false, true), false, true)
                .unwrap();
        assert_eq!(manager.connection_state(), ConnectionState::Connected);

        let mut factory = factory_with(ConnectionState::Connecting, ConnectionState::Connected);
        let manager =
            RemoteServerConnectionManager::new(&mut factory, &network(), &remote(true, false), true, false)
                .unwrap();
        assert_eq!(manager.connection_state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_both_required_aggregate_rule() {
        // Both connected -> Connected.
        let mut factory = factory_with(ConnectionState::Connected, ConnectionState::Connected);
        let manager =
            RemoteServerConnectionManager::new(&mut factory, &network(), &remote(true, true), true, true)
                .unwrap();
        assert_eq!(manager.connection_state(), ConnectionState::Connected);

        // One disconnected -> Disconnected.
        let mut factory = factory_with(ConnectionState::Disconnected, ConnectionState::Connected);
        let manager =
            RemoteServerConnectionManager::new(&mut factory, &network(), &remote(true, true), true, true)
                .unwrap();
        assert_eq!(manager.connection_state(), ConnectionState::Disconnected);

        // Connecting + Connected -> Connecting.
        let mut factory = factory_with(ConnectionState::Connecting, ConnectionState::Connected);
        let manager =
            RemoteServerConnectionManager::new(&mut factory, &network(), &remote(true, true), true, true)
                .unwrap();
        assert_eq!(manager.connection_state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_state_change_transitions() {
        let mut factory = factory_with(ConnectionState::Connecting, ConnectionState::Connected);
        let mut manager =
            RemoteServerConnectionManager::new(&mut factory, &network(), &remote(true, true), true, true)
                .unwrap();

        // TCP completing brings the aggregate up.
        let transition =
            manager.on_connection_state_change(TransportProtocol::Tcp, ConnectionState::Connected);
        assert_eq!(transition, Some(AggregateTransition::Established));

        // Repeated Connected report: no transition.
        let transition =
            manager.on_connection_state_change(TransportProtocol::Udp, ConnectionState::Connected);
        assert_eq!(transition, None);

        // Any protocol dropping closes the aggregate.
        let transition = manager
            .on_connection_state_change(TransportProtocol::Udp, ConnectionState::Disconnected);
        assert_eq!(transition, Some(AggregateTransition::Closed));
    }

    #[test]
    fn test_missing_remote_endpoint_fails_construction() {
        let mut factory = factory_with(ConnectionState::Connecting, ConnectionState::Connected);
        let result =
            RemoteServerConnectionManager::new(&mut factory, &network(), &remote(false, true), true, true);
        assert!(matches!(result, Err(SomeIpError::ConnectionNotAvailable)));
    }

    #[test]
    fn test_send_request_contract() {
        let mut factory = factory_with(ConnectionState::Connected, ConnectionState::Connected);
        let mut manager =
            RemoteServerConnectionManager::new(&mut factory, &network(), &remote(false, true), false, true)
                .unwrap();

        // No TCP sender constructed.
        assert!(matches!(
            manager.send_request(TransportProtocol::Tcp, &packet()),
            Err(SomeIpError::ConnectionNotAvailable)
        ));

        // UDP send succeeds and reaches the sender.
        manager.send_request(TransportProtocol::Udp, &packet()).unwrap();
        assert_eq!(factory.udp_state.as_ref().unwrap().borrow().sent.len(), 1);

        // Underlying failure maps to ConnectionTransmissionFailed.
        factory.udp_state.as_ref().unwrap().borrow_mut().fail_send = true;
        assert!(matches!(
            manager.send_request(TransportProtocol::Udp, &packet()),
            Err(SomeIpError::ConnectionTransmissionFailed)
        ));
    }

    #[test]
    fn test_local_tcp_endpoint_exposed() {
        let mut factory = factory_with(ConnectionState::Connecting, ConnectionState::Connected);
        let manager =
            RemoteServerConnectionManager::new(&mut factory, &network(), &remote(true, true), true, true)
                .unwrap();
        assert_eq!(
            manager.local_tcp_endpoint(),
            Some(EndpointAddress::new(
                IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
                40000
            ))
        );
    }
}
