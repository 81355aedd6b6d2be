//! Eventgroup manager of one required service instance.
//!
//! Owns the per-eventgroup state machines, caches the active offer and fans
//! SD and connection signals out to them. State machine side effects are
//! wired to the SD message builder, the entry scheduler, the timer manager
//! and the multicast listener.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, error, trace};

use crate::client::multicast::EventMulticastListener;
use crate::config::{EndpointAddress, RequiredEventgroups, ServiceAddress, ServiceDeployment};
use crate::reactor::{TimerHandle, TimerManager};
use crate::sd::dispatch::ActiveOfferEntry;
use crate::sd::scheduler::SdEntryScheduler;
use crate::sd::types::EventgroupId;

use super::sd_message_builder::EventgroupSdMessageBuilder;
use super::state_machine::{
    EventgroupState, EventgroupStateMachine, EventgroupStateMachineContext,
};
use super::EventSubscriptionState;

/// Operations the eventgroup manager needs from its owning RemoteServer.
pub trait EventgroupManagerContext {
    /// Whether the aggregate transport connection is established.
    fn is_connected(&self) -> bool;

    /// An eventgroup subscription has been acknowledged.
    fn on_eventgroup_subscribed(&mut self, eventgroup_id: EventgroupId);
}

/// Shared state of the manager, split from the state machine container so a
/// state machine context can borrow it while a machine runs.
struct ManagerCore {
    message_builder: EventgroupSdMessageBuilder,
    message_scheduler: Rc<RefCell<dyn SdEntryScheduler>>,
    timer_manager: Rc<RefCell<dyn TimerManager>>,
    multicast_listener: Rc<RefCell<EventMulticastListener>>,
    required_eventgroups: RequiredEventgroups,
    active_offer: Option<ActiveOfferEntry>,
    is_active_offer_multicast: bool,
    /// Number of state machines currently joined to the multicast group.
    eventgroup_subscriptions: usize,
}

impl ManagerCore {
    /// Response delay range for entries answering a multicast offer.
    fn subscribe_delay_range(&self, eventgroup_id: EventgroupId) -> (Duration, Duration) {
        if self.is_active_offer_multicast {
            self.required_eventgroups
                .get(&eventgroup_id)
                .and_then(|timing| timing.and_then(|t| t.request_response_delay))
                .unwrap_or((Duration::ZERO, Duration::ZERO))
        } else {
            (Duration::ZERO, Duration::ZERO)
        }
    }
}

struct FsmContext<'a> {
    core: &'a mut ManagerCore,
    remote_server: &'a mut dyn EventgroupManagerContext,
}

impl EventgroupStateMachineContext for FsmContext<'_> {
    fn is_service_available(&self) -> bool {
        self.core.active_offer.is_some()
    }

    fn is_connected(&self) -> bool {
        self.remote_server.is_connected()
    }

    fn send_subscribe_eventgroup(&mut self, eventgroup_id: EventgroupId) {
        let Some(offer) = &self.core.active_offer else {
            error!("Cannot send SubscribeEventgroup {eventgroup_id} without an active offer");
            return;
        };
        let destination: SocketAddr = offer.sd_source;

        match self
            .core
            .message_builder
            .make_subscribe_eventgroup_entry(eventgroup_id, offer)
        {
            Ok(entry) => {
                let (min_delay, max_delay) = self.core.subscribe_delay_range(eventgroup_id);
                trace!("Scheduling SubscribeEventgroup {eventgroup_id} to {destination}");
                self.core
                    .message_scheduler
                    .borrow_mut()
                    .schedule_subscribe_eventgroup_entry(entry, min_delay, max_delay, destination);
            }
            Err(e) => {
                error!("Rejecting SubscribeEventgroup {eventgroup_id}: {e}");
            }
        }
    }

    fn send_stop_subscribe_eventgroup(&mut self, eventgroup_id: EventgroupId) {
        let Some(offer) = &self.core.active_offer else {
            error!("Cannot send StopSubscribeEventgroup {eventgroup_id} without an active offer");
            return;
        };
        let destination: SocketAddr = offer.sd_source;

        match self
            .core
            .message_builder
            .make_stop_subscribe_eventgroup_entry(eventgroup_id, offer)
        {
            Ok(entry) => {
                trace!("Scheduling StopSubscribeEventgroup {eventgroup_id} to {destination}");
                self.core
                    .message_scheduler
                    .borrow_mut()
                    .schedule_stop_subscribe_eventgroup_entry(entry, destination);
            }
            Err(e) => {
                error!("Rejecting StopSubscribeEventgroup {eventgroup_id}: {e}");
            }
        }
    }

    fn start_listen_for_multicast_eventgroup(
        &mut self,
        multicast_address: std::net::IpAddr,
        multicast_port: u16,
    ) -> bool {
        let mut result = true;
        // Only the first acknowledged eventgroup joins the group physically.
        if self.core.eventgroup_subscriptions == 0 {
            // The ACK validation guarantees the offer carries a UDP endpoint
            // that acts as the event sender on the multicast channel.
            let sender: EndpointAddress = match self
                .core
                .active_offer
                .as_ref()
                .and_then(|offer| offer.udp_endpoint)
            {
                Some(sender) => sender,
                None => {
                    error!("Multicast listen requested without UDP endpoint in the active offer");
                    return false;
                }
            };
            result = self
                .core
                .multicast_listener
                .borrow_mut()
                .start_listen_for_multicast_eventgroup(
                    multicast_address,
                    multicast_port,
                    sender.address,
                    sender.port,
                );
        }
        if result {
            self.core.eventgroup_subscriptions += 1;
        }
        result
    }

    fn stop_listen_for_multicast_eventgroup(&mut self) {
        if self.core.eventgroup_subscriptions > 0 {
            self.core.eventgroup_subscriptions -= 1;
        }
        if self.core.eventgroup_subscriptions == 0 {
            self.core
                .multicast_listener
                .borrow_mut()
                .stop_listen_for_multicast_eventgroup();
        }
    }

    fn on_eventgroup_subscribed(&mut self, eventgroup_id: EventgroupId) {
        self.remote_server.on_eventgroup_subscribed(eventgroup_id);
    }

    fn arm_retry_timer(&mut self, timer: TimerHandle) {
        self.core.timer_manager.borrow_mut().start(timer);
    }

    fn cancel_retry_timer(&mut self, timer: TimerHandle) {
        self.core.timer_manager.borrow_mut().stop(timer);
    }
}

/// Manager of all eventgroup subscriptions of one required service instance.
pub struct EventgroupManager {
    state_machines: Vec<EventgroupStateMachine>,
    retry_timers: Vec<(TimerHandle, EventgroupId)>,
    core: ManagerCore,
}

impl EventgroupManager {
    /// Create a manager with one state machine per required eventgroup.
    ///
    /// Eventgroups with a retry configuration get re-subscription enabled
    /// with a timer created from the configured delay.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        deployment: ServiceDeployment,
        udp_endpoint: Option<EndpointAddress>,
        custom_subscription_endpoints: ServiceAddress,
        required_eventgroups: RequiredEventgroups,
        timer_manager: Rc<RefCell<dyn TimerManager>>,
        message_scheduler: Rc<RefCell<dyn SdEntryScheduler>>,
        multicast_listener: Rc<RefCell<EventMulticastListener>>,
    ) -> Self {
        debug!(
            "Creating eventgroup manager with {} eventgroups",
            required_eventgroups.len()
        );

        let mut state_machines = Vec::with_capacity(required_eventgroups.len());
        let mut retry_timers = Vec::new();
        for (eventgroup_id, timing) in &required_eventgroups {
            let mut sm = EventgroupStateMachine::new(*eventgroup_id);
            if let Some(retry) = timing.and_then(|t| t.retry) {
                let timer = timer_manager.borrow_mut().create_timer(retry.delay);
                sm.enable_resubscription(retry, timer);
                retry_timers.push((timer, *eventgroup_id));
            }
            state_machines.push(sm);
        }

        let message_builder = EventgroupSdMessageBuilder::new(
            deployment,
            udp_endpoint,
            required_eventgroups.clone(),
            custom_subscription_endpoints,
        );

        Self {
            state_machines,
            retry_timers,
            core: ManagerCore {
                message_builder,
                message_scheduler,
                timer_manager,
                multicast_listener,
                required_eventgroups,
                active_offer: None,
                is_active_offer_multicast: false,
                eventgroup_subscriptions: 0,
            },
        }
    }

    /// Current subscription state of an eventgroup.
    ///
    /// Panics if the eventgroup is not configured.
    pub fn subscription_state(&self, eventgroup_id: EventgroupId) -> EventSubscriptionState {
        let sm = self
            .state_machines
            .iter()
            .find(|sm| sm.eventgroup_id() == eventgroup_id)
            .unwrap_or_else(|| panic!("Eventgroup {eventgroup_id} is not configured"));
        match sm.state() {
            EventgroupState::Subscribed => EventSubscriptionState::Subscribed,
            EventgroupState::SubscriptionPending => EventSubscriptionState::SubscriptionPending,
            EventgroupState::ServiceDown | EventgroupState::NotSubscribed => {
                EventSubscriptionState::NotSubscribed
            }
        }
    }

    /// Whether an offer for the service is currently active.
    pub fn is_service_available(&self) -> bool {
        self.core.active_offer.is_some()
    }

    /// Whether the active offer was received via multicast.
    pub fn is_active_offer_multicast(&self) -> bool {
        self.core.is_active_offer_multicast
    }

    /// The cached active offer.
    pub fn active_offer(&self) -> Option<&ActiveOfferEntry> {
        self.core.active_offer.as_ref()
    }

    /// Number of state machines currently joined to multicast.
    pub fn eventgroup_subscriptions(&self) -> usize {
        self.core.eventgroup_subscriptions
    }

    /// A matching OfferService entry has been received.
    pub fn on_offer_service(
        &mut self,
        entry: ActiveOfferEntry,
        is_multicast: bool,
        remote_server: &mut dyn EventgroupManagerContext,
    ) {
        self.core.active_offer = Some(entry);
        self.core.is_active_offer_multicast = is_multicast;

        let core = &mut self.core;
        for sm in &mut self.state_machines {
            let mut ctx = FsmContext {
                core: &mut *core,
                remote_server: &mut *remote_server,
            };
            sm.on_offer_service(is_multicast, &mut ctx);
        }
    }

    /// A matching StopOfferService entry has been received.
    pub fn on_stop_offer_service(&mut self, remote_server: &mut dyn EventgroupManagerContext) {
        let core = &mut self.core;
        for sm in &mut self.state_machines {
            let mut ctx = FsmContext {
                core: &mut *core,
                remote_server: &mut *remote_server,
            };
            sm.on_stop_offer_service(&mut ctx);
        }
        self.core.active_offer = None;
    }

    /// A local application subscribed to an event of the given eventgroup.
    ///
    /// Panics if the eventgroup is not configured; the coordinator resolves
    /// the eventgroup from validated configuration before calling in.
    pub fn on_subscribe(
        &mut self,
        eventgroup_id: EventgroupId,
        remote_server: &mut dyn EventgroupManagerContext,
    ) {
        let core = &mut self.core;
        let sm = Self::find_machine(&mut self.state_machines, eventgroup_id);
        let mut ctx = FsmContext { core, remote_server };
        sm.on_subscribe(&mut ctx);
    }

    /// A local application unsubscribed from an event of the given eventgroup.
    pub fn on_unsubscribe(
        &mut self,
        eventgroup_id: EventgroupId,
        remote_server: &mut dyn EventgroupManagerContext,
    ) {
        let core = &mut self.core;
        let sm = Self::find_machine(&mut self.state_machines, eventgroup_id);
        let mut ctx = FsmContext { core, remote_server };
        sm.on_unsubscribe(&mut ctx);
    }

    /// A matching SubscribeEventgroupAck entry has been received.
    ///
    /// Drops the ACK when no offer is active, and when it carries a
    /// multicast endpoint although the active offer has no UDP endpoint.
    pub fn on_subscribe_eventgroup_ack(
        &mut self,
        eventgroup_id: EventgroupId,
        multicast_endpoint: Option<EndpointAddress>,
        remote_server: &mut dyn EventgroupManagerContext,
    ) {
        let Some(offer) = &self.core.active_offer else {
            error!("Received SubscribeEventgroupAck with no active offer");
            return;
        };

        // A port of 0 is the dynamic/invalid marker, treat as absent.
        let multicast_endpoint = multicast_endpoint.filter(|e| e.port != 0);

        if multicast_endpoint.is_some() && offer.udp_endpoint.is_none() {
            error!(
                "Received SubscribeEventgroupAck with multicast endpoint but no UDP endpoint was \
                 present in the active OfferService. Check the server configuration for consistency."
            );
            return;
        }

        let core = &mut self.core;
        let sm = Self::find_machine(&mut self.state_machines, eventgroup_id);
        let mut ctx = FsmContext { core, remote_server };
        sm.on_subscribe_eventgroup_ack(multicast_endpoint.map(|e| (e.address, e.port)), &mut ctx);
    }

    /// A matching SubscribeEventgroupNack entry has been received.
    pub fn on_subscribe_eventgroup_nack(
        &mut self,
        eventgroup_id: EventgroupId,
        remote_server: &mut dyn EventgroupManagerContext,
    ) {
        let core = &mut self.core;
        let sm = Self::find_machine(&mut self.state_machines, eventgroup_id);
        let mut ctx = FsmContext { core, remote_server };
        sm.on_subscribe_eventgroup_nack(&mut ctx);
    }

    /// The transport connection to the provider has been established.
    pub fn on_connection_established(&mut self, remote_server: &mut dyn EventgroupManagerContext) {
        let core = &mut self.core;
        for sm in &mut self.state_machines {
            let mut ctx = FsmContext {
                core: &mut *core,
                remote_server: &mut *remote_server,
            };
            sm.on_connection_established(&mut ctx);
        }
    }

    /// The transport connection to the provider has been closed.
    pub fn on_connection_closed(&mut self, remote_server: &mut dyn EventgroupManagerContext) {
        let core = &mut self.core;
        for sm in &mut self.state_machines {
            let mut ctx = FsmContext {
                core: &mut *core,
                remote_server: &mut *remote_server,
            };
            sm.on_connection_closed(&mut ctx);
        }
    }

    /// A retry timer created by this manager has fired.
    pub fn on_retry_timer(
        &mut self,
        timer: TimerHandle,
        remote_server: &mut dyn EventgroupManagerContext,
    ) {
        let Some((_, eventgroup_id)) = self
            .retry_timers
            .iter()
            .find(|(handle, _)| *handle == timer)
            .copied()
        else {
            debug!("Ignoring expiration of unknown retry timer {timer:?}");
            return;
        };

        let core = &mut self.core;
        let sm = Self::find_machine(&mut self.state_machines, eventgroup_id);
        let mut ctx = FsmContext { core, remote_server };
        sm.on_retry_timer(&mut ctx);
    }

    /// Register the local TCP endpoint used in subscription requests.
    pub fn register_local_tcp_endpoint(&mut self, endpoint: EndpointAddress) {
        self.core.message_builder.register_local_tcp_endpoint(endpoint);
    }

    fn find_machine(
        state_machines: &mut [EventgroupStateMachine],
        eventgroup_id: EventgroupId,
    ) -> &mut EventgroupStateMachine {
        state_machines
            .iter_mut()
            .find(|sm| sm.eventgroup_id() == eventgroup_id)
            .unwrap_or_else(|| panic!("Eventgroup {eventgroup_id} is not configured"))
    }
}
