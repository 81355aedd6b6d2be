//! Per-eventgroup subscription state machine.
//!
//! The state machine joins four asynchronous signal sources into one
//! subscription state: service offers, transport connection state, local
//! subscribe/unsubscribe requests and SubscribeEventgroupAck/Nack entries.
//! Side effects run through the [`EventgroupStateMachineContext`], which the
//! owning manager implements; ownership is strictly downward.

use std::net::IpAddr;

use tracing::{debug, trace};

use crate::config::SubscribeRetryConfig;
use crate::reactor::TimerHandle;
use crate::sd::types::EventgroupId;

/// States of the eventgroup subscription state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventgroupState {
    /// No active offer (or transport down). Initial state.
    ServiceDown,
    /// Offer active, no subscription requested on the wire.
    NotSubscribed,
    /// SubscribeEventgroup sent, no ACK yet.
    SubscriptionPending,
    /// Subscription acknowledged by the provider.
    Subscribed,
}

/// Operations the state machine needs from its owner.
pub trait EventgroupStateMachineContext {
    /// Whether an offer for the service is currently active.
    fn is_service_available(&self) -> bool;

    /// Whether the aggregate transport connection is established.
    fn is_connected(&self) -> bool;

    /// Initiate transmission of a SubscribeEventgroup entry.
    fn send_subscribe_eventgroup(&mut self, eventgroup_id: EventgroupId);

    /// Initiate transmission of a StopSubscribeEventgroup entry.
    fn send_stop_subscribe_eventgroup(&mut self, eventgroup_id: EventgroupId);

    /// Start listening for multicast events of this eventgroup.
    ///
    /// Returns false if joining the multicast group failed.
    fn start_listen_for_multicast_eventgroup(
        &mut self,
        multicast_address: IpAddr,
        multicast_port: u16,
    ) -> bool;

    /// Stop listening for multicast events of this eventgroup.
    fn stop_listen_for_multicast_eventgroup(&mut self);

    /// The subscription of this eventgroup has been acknowledged.
    fn on_eventgroup_subscribed(&mut self, eventgroup_id: EventgroupId);

    /// Arm the retry timer.
    fn arm_retry_timer(&mut self, timer: TimerHandle);

    /// Cancel the retry timer.
    fn cancel_retry_timer(&mut self, timer: TimerHandle);
}

#[derive(Debug)]
struct RetryState {
    config: SubscribeRetryConfig,
    timer: TimerHandle,
    retries_left: u8,
}

/// Subscription state machine of one required eventgroup.
#[derive(Debug)]
pub struct EventgroupStateMachine {
    eventgroup_id: EventgroupId,
    state: EventgroupState,
    subscribers: usize,
    retry: Option<RetryState>,
    multicast_joined: bool,
}

impl EventgroupStateMachine {
    /// Create a state machine in ServiceDown with no local subscribers.
    pub fn new(eventgroup_id: EventgroupId) -> Self {
        Self {
            eventgroup_id,
            state: EventgroupState::ServiceDown,
            subscribers: 0,
            retry: None,
            multicast_joined: false,
        }
    }

    /// Enable NACK-triggered re-subscription with the given timer.
    ///
    /// The timer period carries the configured retry delay; the owner maps
    /// its expiration back to [`Self::on_retry_timer`].
    pub fn enable_resubscription(&mut self, config: SubscribeRetryConfig, timer: TimerHandle) {
        self.retry = Some(RetryState {
            config,
            timer,
            retries_left: config.max_retries,
        });
    }

    /// The eventgroup this state machine manages.
    pub fn eventgroup_id(&self) -> EventgroupId {
        self.eventgroup_id
    }

    /// The current state.
    pub fn state(&self) -> EventgroupState {
        self.state
    }

    /// Whether this state machine currently holds a multicast membership.
    pub fn is_multicast_joined(&self) -> bool {
        self.multicast_joined
    }

    /// A matching OfferService entry (initial or renewal) has been received.
    pub fn on_offer_service(&mut self, is_multicast: bool, ctx: &mut dyn EventgroupStateMachineContext) {
        trace!(
            "Eventgroup {}: offer received (multicast: {is_multicast}) in {:?}",
            self.eventgroup_id,
            self.state
        );

        // Any offer renewal resets the retry budget.
        if let Some(retry) = &mut self.retry {
            retry.retries_left = retry.config.max_retries;
        }

        match self.state {
            EventgroupState::ServiceDown => {
                if self.subscribers > 0 {
                    ctx.send_subscribe_eventgroup(self.eventgroup_id);
                    self.state = EventgroupState::SubscriptionPending;
                } else {
                    self.state = EventgroupState::NotSubscribed;
                }
            }
            EventgroupState::NotSubscribed => {
                if self.subscribers > 0 && ctx.is_connected() {
                    ctx.send_subscribe_eventgroup(self.eventgroup_id);
                    self.state = EventgroupState::SubscriptionPending;
                }
            }
            // Already on the wire; the pending Subscribe's ACK path stays valid
            // and a subscribed eventgroup does not re-send.
            EventgroupState::SubscriptionPending | EventgroupState::Subscribed => {}
        }
    }

    /// A matching StopOfferService entry has been received.
    pub fn on_stop_offer_service(&mut self, ctx: &mut dyn EventgroupStateMachineContext) {
        if self.state != EventgroupState::ServiceDown {
            self.teardown(ctx);
        }
    }

    /// The transport connection to the provider has been established.
    pub fn on_connection_established(&mut self, ctx: &mut dyn EventgroupStateMachineContext) {
        if self.state == EventgroupState::NotSubscribed
            && self.subscribers > 0
            && ctx.is_service_available()
        {
            ctx.send_subscribe_eventgroup(self.eventgroup_id);
            self.state = EventgroupState::SubscriptionPending;
        }
    }

    /// The transport connection to the provider has been closed.
    pub fn on_connection_closed(&mut self, ctx: &mut dyn EventgroupStateMachineContext) {
        if self.state != EventgroupState::ServiceDown {
            self.teardown(ctx);
        }
    }

    /// A local application subscribed to an event of this eventgroup.
    pub fn on_subscribe(&mut self, ctx: &mut dyn EventgroupStateMachineContext) {
        self.subscribers += 1;

        if self.state == EventgroupState::NotSubscribed
            && ctx.is_service_available()
            && ctx.is_connected()
        {
            ctx.send_subscribe_eventgroup(self.eventgroup_id);
            self.state = EventgroupState::SubscriptionPending;
        }
    }

    /// A local application unsubscribed from an event of this eventgroup.
    pub fn on_unsubscribe(&mut self, ctx: &mut dyn EventgroupStateMachineContext) {
        if self.subscribers > 0 {
            self.subscribers -= 1;
        }

        if self.subscribers == 0 && self.state == EventgroupState::Subscribed {
            ctx.send_stop_subscribe_eventgroup(self.eventgroup_id);
            if self.multicast_joined {
                ctx.stop_listen_for_multicast_eventgroup();
                self.multicast_joined = false;
            }
            self.state = EventgroupState::NotSubscribed;
        }
    }

    /// A SubscribeEventgroupAck for this eventgroup has been received.
    ///
    /// The owner has already validated the ACK against the active offer; a
    /// multicast endpoint here implies the offer carries a UDP endpoint.
    pub fn on_subscribe_eventgroup_ack(
        &mut self,
        multicast_endpoint: Option<(IpAddr, u16)>,
        ctx: &mut dyn EventgroupStateMachineContext,
    ) {
        match self.state {
            EventgroupState::SubscriptionPending => {
                if let Some(retry) = &mut self.retry {
                    ctx.cancel_retry_timer(retry.timer);
                    retry.retries_left = retry.config.max_retries;
                }

                if let Some((address, port)) = multicast_endpoint {
                    if ctx.start_listen_for_multicast_eventgroup(address, port) {
                        self.multicast_joined = true;
                    }
                }

                self.state = EventgroupState::Subscribed;
                ctx.on_eventgroup_subscribed(self.eventgroup_id);
            }
            // Renewal ACK for an already acknowledged subscription.
            EventgroupState::Subscribed => {}
            // Tolerated without state change, like the stray ACKs a provider
            // may emit after a local unsubscribe raced its renewal.
            EventgroupState::NotSubscribed | EventgroupState::ServiceDown => {
                debug!(
                    "Eventgroup {}: ignoring ACK in {:?}",
                    self.eventgroup_id, self.state
                );
            }
        }
    }

    /// A SubscribeEventgroupNack for this eventgroup has been received.
    pub fn on_subscribe_eventgroup_nack(&mut self, ctx: &mut dyn EventgroupStateMachineContext) {
        if self.state == EventgroupState::SubscriptionPending {
            if let Some(retry) = &self.retry {
                ctx.arm_retry_timer(retry.timer);
            }
        }
    }

    /// The retry timer fired.
    pub fn on_retry_timer(&mut self, ctx: &mut dyn EventgroupStateMachineContext) {
        if self.state != EventgroupState::SubscriptionPending {
            return;
        }
        if let Some(retry) = &mut self.retry {
            if retry.retries_left > 0 {
                retry.retries_left -= 1;
                ctx.send_subscribe_eventgroup(self.eventgroup_id);
            } else {
                // Retries exhausted; wait for the next offer renewal.
                self.state = EventgroupState::NotSubscribed;
            }
        }
    }

    /// Common teardown path for StopOfferService and ConnectionClosed.
    fn teardown(&mut self, ctx: &mut dyn EventgroupStateMachineContext) {
        if let Some(retry) = &mut self.retry {
            ctx.cancel_retry_timer(retry.timer);
            retry.retries_left = retry.config.max_retries;
        }
        if self.multicast_joined {
            ctx.stop_listen_for_multicast_eventgroup();
            self.multicast_joined = false;
        }
        self.state = EventgroupState::ServiceDown;
    }
}
