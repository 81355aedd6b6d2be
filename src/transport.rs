//! Transport interfaces consumed by the client core.
//!
//! The daemon's connection manager implements these traits; the core only
//! drives them. Senders are non-blocking: a send either hands the bytes to
//! the transport or fails, and connection loss is reported asynchronously
//! through state-change notifications routed to the owning RemoteServer.

use std::net::IpAddr;

use crate::config::EndpointAddress;
use crate::error::Result;
use crate::message::Packet;

/// Connection state of a transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// Currently attempting to connect.
    Connecting,
    /// Connected and ready.
    Connected,
}

impl ConnectionState {
    /// Check if the connection is usable.
    pub fn is_connected(&self) -> bool {
        *self == ConnectionState::Connected
    }

    /// Check if a connection attempt is in progress.
    pub fn is_connecting(&self) -> bool {
        *self == ConnectionState::Connecting
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

/// Common sender surface shared by TCP and UDP senders.
pub trait Sender {
    /// Hand a packet to the transport for transmission.
    fn send(&mut self, packet: &Packet) -> Result<()>;

    /// Current connection state of this sender.
    fn connection_state(&self) -> ConnectionState;
}

/// A TCP sender towards one remote endpoint.
pub trait TcpSender: Sender {
    /// The locally bound endpoint of the TCP connection.
    fn local_endpoint(&self) -> EndpointAddress;
}

/// A UDP sender towards one remote endpoint.
pub trait UdpSender: Sender {}

/// A local UDP endpoint used for multicast event reception.
pub trait UdpEndpoint {
    /// Join a multicast group, filtering on the given sender.
    fn join_multicast_group(
        &mut self,
        multicast_address: IpAddr,
        sender_address: IpAddr,
        sender_port: u16,
    ) -> Result<()>;

    /// Leave a previously joined multicast group.
    fn leave_multicast_group(&mut self, multicast_address: IpAddr) -> Result<()>;
}

/// Factory for transport senders and endpoints.
///
/// Replaces the per-protocol connection manager coupling: RemoteServer code
/// only sees this trait, which keeps test doubles trivial.
pub trait TransportFactory {
    /// Get or create a TCP sender from the local endpoint to the remote endpoint.
    fn get_tcp_sender(
        &mut self,
        local: EndpointAddress,
        remote: EndpointAddress,
    ) -> Result<Box<dyn TcpSender>>;

    /// Get or create a UDP sender from the local endpoint to the remote endpoint.
    fn get_udp_sender(
        &mut self,
        local: EndpointAddress,
        remote: EndpointAddress,
    ) -> Result<Box<dyn UdpSender>>;

    /// Get or create a local UDP endpoint (used for multicast joins).
    fn get_udp_endpoint(&mut self, local: EndpointAddress) -> Result<Box<dyn UdpEndpoint>>;
}
