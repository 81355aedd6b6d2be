//! SD entry transmission scheduling interface consumed by the client core.
//!
//! The scheduler aggregates entries into UDP datagrams bounded at
//! [`MAX_SD_MESSAGE_SIZE`](super::types::MAX_SD_MESSAGE_SIZE) bytes,
//! allocates per-destination session IDs and preserves insertion order
//! within one destination. Its implementation lives with the daemon's SD
//! endpoint, outside this crate.

use std::net::SocketAddr;
use std::time::Duration;

use super::entries::{StopSubscribeEventgroupEntry, SubscribeEventgroupEntry};

/// Scheduler for outgoing eventgroup subscription entries.
pub trait SdEntryScheduler {
    /// Schedule a SubscribeEventgroup entry for transmission.
    ///
    /// The entry is sent after a random delay within `[min_delay, max_delay]`;
    /// a range of `[0, 0]` means immediate transmission.
    fn schedule_subscribe_eventgroup_entry(
        &mut self,
        entry: SubscribeEventgroupEntry,
        min_delay: Duration,
        max_delay: Duration,
        destination: SocketAddr,
    );

    /// Schedule a StopSubscribeEventgroup entry for immediate transmission.
    fn schedule_stop_subscribe_eventgroup_entry(
        &mut self,
        entry: StopSubscribeEventgroupEntry,
        destination: SocketAddr,
    );
}
