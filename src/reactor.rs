//! Reactor and timer interfaces consumed by the client core.
//!
//! The core runs on a single-threaded cooperative reactor owned by the
//! daemon. It never blocks; all waiting is expressed as timers or software
//! events. The daemon dispatches expirations and triggered software events
//! back into the owning component between I/O dispatches.

use std::time::Duration;

/// Handle of a registered reactor software event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoftwareEventHandle(pub u64);

/// Handle of a timer created through a [`TimerManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// Software-event registration and triggering.
///
/// Registration and unregistration failures are fatal for the caller: a
/// RemoteServer cannot operate without its cleanup event.
pub trait Reactor {
    /// Register a software event. The daemon routes the firing back to the
    /// registering component on the next reactor dispatch.
    fn register_software_event(&mut self) -> Result<SoftwareEventHandle, String>;

    /// Trigger a previously registered software event.
    fn trigger_software_event(&mut self, handle: SoftwareEventHandle) -> Result<(), String>;

    /// Unregister a software event.
    fn unregister_software_event(&mut self, handle: SoftwareEventHandle) -> Result<(), String>;
}

/// One-shot timer management.
///
/// Expirations are routed back by the daemon as calls into the owning
/// component (e.g. `RemoteServer::on_retry_timer`).
pub trait TimerManager {
    /// Create a timer with the given period. The timer is not started.
    fn create_timer(&mut self, period: Duration) -> TimerHandle;

    /// Start (or restart) the timer.
    fn start(&mut self, handle: TimerHandle);

    /// Stop the timer if running.
    fn stop(&mut self, handle: TimerHandle);
}
