//! SOME/IP-SD (Service Discovery) wire codec and dispatching.
//!
//! This module provides:
//! - Wire-exact entry and endpoint option codecs
//! - SD message framing with strict malformed-message detection
//! - Typed subscription entries with deterministic option lowering
//! - Dispatching of received entries into typed client events
//! - The entry scheduler interface consumed by the client core

pub mod dispatch;
pub mod entries;
pub mod entry;
pub mod message;
pub mod option;
pub mod scheduler;
pub mod types;

pub use dispatch::{ActiveOfferEntry, SdClientEvent};
pub use entries::{StopSubscribeEventgroupEntry, SubscribeEventgroupEntry};
pub use entry::{EventgroupEntry, SdEntry, ServiceEntry};
pub use message::{DestinationSessions, SdFlags, SdMessage, SessionCounter};
pub use option::{Ipv4EndpointOption, Ipv6EndpointOption, SdOption};
pub use scheduler::SdEntryScheduler;
pub use types::{
    EntryType, EventgroupId, InstanceId, OptionType, TransportProtocol, MAX_SD_MESSAGE_SIZE,
    SD_ENTRY_SIZE, SD_METHOD_ID, SD_OPTION_HEADER_SIZE, SD_SERVICE_ID,
};
