//! Client-side daemon core: RemoteServer coordination per required service
//! instance.

pub mod connection;
pub mod dispatcher;
pub mod eventgroup;
pub mod multicast;
pub mod remote_server;

pub use connection::{AggregateTransition, RemoteServerConnectionManager};
pub use dispatcher::{ClientEventDispatcher, PduEventHandler, SomeIpEventHandler};
pub use eventgroup::{EventSubscriptionState, EventgroupManager, EventgroupSdMessageBuilder};
pub use multicast::EventMulticastListener;
pub use remote_server::{PacketRouter, RemoteServer, RemoteServerConfig, ServiceDiscoveryClient};
