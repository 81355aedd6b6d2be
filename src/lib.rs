//! Client-side core of a SOME/IP daemon.
//!
//! This crate implements the per required-service-instance machinery of an
//! automotive SOME/IP daemon client: it discovers remote providers via
//! SOME/IP Service Discovery, manages TCP/UDP transport connections to
//! them, coordinates eventgroup subscriptions over per-eventgroup state
//! machines, tracks the subscription state of individual events for local
//! applications and routes method requests and event notifications between
//! local applications and the wire.
//!
//! # Architecture
//!
//! - [`sd`] - wire-exact SOME/IP-SD codec, typed subscription entries and
//!   dispatching of received entries into client events
//! - [`client`] - the [`RemoteServer`](client::RemoteServer) coordinator
//!   with its eventgroup state machines, connection manager, event
//!   dispatcher and multicast listener
//! - [`reactor`], [`transport`] - interfaces of the daemon's single-threaded
//!   reactor and transport layer, consumed but not implemented here
//! - [`config`] - already-parsed configuration value types
//!
//! The core runs on a single-threaded cooperative reactor: all ingress
//! callbacks and egress operations execute on one thread, nothing blocks,
//! and all waiting is expressed as timers or software events. The daemon
//! wires one [`RemoteServer`](client::RemoteServer) per required service
//! instance and routes SD entries, transport state changes and timer
//! expirations to its entry points.

pub mod client;
pub mod config;
pub mod error;
pub mod header;
pub mod message;
pub mod reactor;
pub mod sd;
pub mod transport;
pub mod types;

// Re-export commonly used types at the crate root
pub use client::{EventSubscriptionState, RemoteServer};
pub use error::{Result, SomeIpError};
pub use header::{ClientId, EventId, MethodId, ServiceId, SessionId, SomeIpHeader, HEADER_SIZE};
pub use message::{MessageBuilder, Packet, SomeIpMessage};
pub use types::{MessageType, ReturnCode, PROTOCOL_VERSION};
