//! Client-side eventgroup subscription handling.

pub mod manager;
pub mod sd_message_builder;
pub mod state_machine;

pub use manager::{EventgroupManager, EventgroupManagerContext};
pub use sd_message_builder::EventgroupSdMessageBuilder;
pub use state_machine::{EventgroupState, EventgroupStateMachine, EventgroupStateMachineContext};

use crate::header::EventId;

/// Subscription state of an event or eventgroup as visible to applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSubscriptionState {
    /// Not subscribed. Initial state, also after teardown.
    NotSubscribed,
    /// Subscription requested but not (or no longer) acknowledged.
    SubscriptionPending,
    /// Subscription acknowledged by the provider.
    Subscribed,
}

/// Local subscription bookkeeping for one eventgroup of a RemoteServer.
///
/// Tracks how many local subscriptions are active per event and the
/// coordinator-visible subscription state returned to `subscribe_*` callers.
#[derive(Debug, Default)]
pub struct RemoteServerEventgroup {
    subscribers: Vec<EventId>,
    state: Option<EventSubscriptionState>,
}

impl RemoteServerEventgroup {
    /// Create bookkeeping with no subscribers, state NotSubscribed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one local subscription for an event of this eventgroup.
    pub fn subscribe(&mut self, event_id: EventId) {
        self.subscribers.push(event_id);
        if self.state.is_none() {
            self.state = Some(EventSubscriptionState::SubscriptionPending);
        }
    }

    /// Remove one local subscription for an event of this eventgroup.
    pub fn unsubscribe(&mut self, event_id: EventId) {
        if let Some(pos) = self.subscribers.iter().position(|e| *e == event_id) {
            self.subscribers.swap_remove(pos);
        }
        if self.subscribers.is_empty() {
            self.state = None;
        }
    }

    /// Number of active local subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether any local subscription is active.
    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }

    /// The coordinator-visible subscription state.
    pub fn subscription_state(&self) -> EventSubscriptionState {
        self.state.unwrap_or(EventSubscriptionState::NotSubscribed)
    }

    /// Mark the subscription as acknowledged.
    pub fn on_subscription_accepted(&mut self) {
        if self.state.is_some() {
            self.state = Some(EventSubscriptionState::Subscribed);
        }
    }

    /// Demote the subscription to pending (offer lost, connection lost, NACK).
    pub fn on_subscription_cancelled(&mut self) {
        if self.state.is_some() {
            self.state = Some(EventSubscriptionState::SubscriptionPending);
        }
    }
}
