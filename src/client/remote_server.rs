//! RemoteServer: per required-service-instance coordinator.
//!
//! A RemoteServer joins the asynchronous signal sources of one required
//! service instance - SD offers and ACK/NACK entries, transport connection
//! state, local subscribe/unsubscribe calls - into consistent subscription
//! states, and fans state changes out to the registered observers. It owns
//! its eventgroup manager, connection manager, event dispatcher and
//! multicast listener; scheduler, reactor, timers and transports are
//! referenced collaborators.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, error, trace};

use crate::config::{
    EndpointAddress, RequiredEventgroups, RequiredNetworkEndpoint, ServiceAddress,
    ServiceDeployment, ServiceInstanceId,
};
use crate::error::{Result, SomeIpError};
use crate::header::{ClientId, EventId, MethodId};
use crate::message::{Packet, SomeIpMessage};
use crate::reactor::{Reactor, SoftwareEventHandle, TimerHandle, TimerManager};
use crate::sd::dispatch::ActiveOfferEntry;
use crate::sd::scheduler::SdEntryScheduler;
use crate::sd::types::{EventgroupId, InstanceId, TransportProtocol};
use crate::transport::{ConnectionState, TransportFactory};

use super::connection::{AggregateTransition, RemoteServerConnectionManager};
use super::dispatcher::{ClientEventDispatcher, PduEventHandler, SomeIpEventHandler};
use super::eventgroup::manager::{EventgroupManager, EventgroupManagerContext};
use super::eventgroup::{EventSubscriptionState, RemoteServerEventgroup};
use super::multicast::EventMulticastListener;

/// Routing registry for incoming packets, shared across RemoteServers.
pub trait PacketRouter {
    /// Announce that a RemoteServer handles the given instance.
    fn register_remote_server(&mut self, service_instance_id: ServiceInstanceId);

    /// Withdraw a previously announced RemoteServer.
    fn unregister_remote_server(&mut self, service_instance_id: ServiceInstanceId);
}

/// SD client registry, shared across RemoteServers of one service.
pub trait ServiceDiscoveryClient {
    /// Announce that a RemoteServer wants SD updates for the instance.
    fn register_remote_server(&mut self, instance_id: InstanceId);

    /// Withdraw a previously announced RemoteServer.
    fn unregister_remote_server(&mut self, instance_id: InstanceId);
}

/// Static configuration of a RemoteServer, validated upstream.
pub struct RemoteServerConfig {
    /// The service interface deployment.
    pub deployment: ServiceDeployment,
    /// The instance ID of the required service instance.
    pub instance_id: InstanceId,
    /// Local network endpoint configuration.
    pub network: RequiredNetworkEndpoint,
    /// Required eventgroups with optional timing.
    pub required_eventgroups: RequiredEventgroups,
    /// True when SD is disabled (static SD / communication only).
    pub communication_only: bool,
    /// UDP message accumulation timeouts per method.
    pub method_accumulation_timeouts: HashMap<MethodId, Duration>,
    /// Custom eventgroup subscription endpoints, replacing assigned ones.
    pub custom_subscription_endpoints: ServiceAddress,
}

/// Coordinator of one required service instance.
pub struct RemoteServer {
    deployment: ServiceDeployment,
    instance_id: InstanceId,
    network: RequiredNetworkEndpoint,
    communication_only: bool,
    method_accumulation_timeouts: HashMap<MethodId, Duration>,

    packet_router: Rc<RefCell<dyn PacketRouter>>,
    service_discovery_client: Option<Rc<RefCell<dyn ServiceDiscoveryClient>>>,
    reactor: Rc<RefCell<dyn Reactor>>,
    transport_factory: Rc<RefCell<dyn TransportFactory>>,

    eventgroup_manager: Option<EventgroupManager>,
    connection_manager: Option<RemoteServerConnectionManager>,
    multicast_listener: Rc<RefCell<EventMulticastListener>>,
    dispatcher: ClientEventDispatcher,
    eventgroup_map: BTreeMap<EventgroupId, RemoteServerEventgroup>,

    /// Set upon offer reception, reset upon stop offer.
    remote_server_address: Option<ServiceAddress>,
    /// Set upon offer reception, reset upon stop offer.
    active_offer: Option<ActiveOfferEntry>,

    tcp_connection_required: bool,
    udp_connection_required: bool,
    is_multicast_only: bool,

    /// Software event deferring disconnection cleanup to the next reactor tick.
    sw_event_cleanup: SoftwareEventHandle,
}

impl RemoteServer {
    /// Create a RemoteServer.
    ///
    /// With dynamic SD the instance registers itself with the SD client; an
    /// already active offer then reaches it through
    /// [`Self::on_offer_remote_service`]. With static SD,
    /// [`Self::initialize_static_sd`] must be called to simulate the offer.
    ///
    /// Panics when the reactor refuses the cleanup software event, or when
    /// dynamic SD is configured without an SD client.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RemoteServerConfig,
        packet_router: Rc<RefCell<dyn PacketRouter>>,
        service_discovery_client: Option<Rc<RefCell<dyn ServiceDiscoveryClient>>>,
        message_scheduler: Rc<RefCell<dyn SdEntryScheduler>>,
        timer_manager: Rc<RefCell<dyn TimerManager>>,
        reactor: Rc<RefCell<dyn Reactor>>,
        transport_factory: Rc<RefCell<dyn TransportFactory>>,
    ) -> Self {
        let RemoteServerConfig {
            deployment,
            instance_id,
            network,
            required_eventgroups,
            communication_only,
            method_accumulation_timeouts,
            custom_subscription_endpoints,
        } = config;

        let tcp_connection_required = deployment
            .requires_protocol(&required_eventgroups, TransportProtocol::Tcp)
            && network.tcp_port.is_some();
        let udp_connection_required = deployment
            .requires_protocol(&required_eventgroups, TransportProtocol::Udp)
            && network.udp_port.is_some();
        let is_multicast_only = network.tcp_port.is_none() && network.udp_port.is_none();

        let field_events: HashSet<EventId> = deployment
            .events
            .iter()
            .filter(|e| e.is_field)
            .map(|e| e.event_id)
            .collect();
        let service_instance_id = ServiceInstanceId {
            deployment_id: deployment.deployment_id,
            instance_id,
        };
        let dispatcher = ClientEventDispatcher::new(service_instance_id, field_events);

        let eventgroup_map: BTreeMap<EventgroupId, RemoteServerEventgroup> = required_eventgroups
            .keys()
            .map(|eg| (*eg, RemoteServerEventgroup::new()))
            .collect();

        let multicast_listener = Rc::new(RefCell::new(EventMulticastListener::new(
            transport_factory.clone(),
            network.address,
        )));

        packet_router
            .borrow_mut()
            .register_remote_server(service_instance_id);

        let eventgroup_manager = if communication_only {
            None
        } else {
            Some(EventgroupManager::new(
                deployment.clone(),
                network.udp_endpoint(),
                custom_subscription_endpoints,
                required_eventgroups,
                timer_manager,
                message_scheduler,
                multicast_listener.clone(),
            ))
        };

        if !communication_only {
            let Some(sd_client) = &service_discovery_client else {
                error!("Dynamic SD configured but no SD client provided");
                panic!("Dynamic SD configured but no SD client provided");
            };
            sd_client.borrow_mut().register_remote_server(instance_id);
        }

        // Register the software event used for closed connection cleanup.
        let sw_event_cleanup = match reactor.borrow_mut().register_software_event() {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to register the reactor software event: {e}");
                panic!("Failed to register the reactor software event: {e}");
            }
        };

        Self {
            deployment,
            instance_id,
            network,
            communication_only,
            method_accumulation_timeouts,
            packet_router,
            service_discovery_client,
            reactor,
            transport_factory,
            eventgroup_manager,
            connection_manager: None,
            multicast_listener,
            dispatcher,
            eventgroup_map,
            remote_server_address: None,
            active_offer: None,
            tcp_connection_required,
            udp_connection_required,
            is_multicast_only,
            sw_event_cleanup,
        }
    }

    /// The instance ID of this required service instance.
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// The service instance identity used for observer callbacks.
    pub fn service_instance_id(&self) -> ServiceInstanceId {
        ServiceInstanceId {
            deployment_id: self.deployment.deployment_id,
            instance_id: self.instance_id,
        }
    }

    /// Subscribe a local application to a SOME/IP event.
    ///
    /// Registers the observer, forwards the subscription to the eventgroup
    /// state machine and returns the current subscription state. The caller
    /// additionally receives the state as an immediate notification; later
    /// changes are pushed asynchronously.
    pub fn subscribe_someip_event(
        &mut self,
        event_id: EventId,
        observer: Rc<dyn SomeIpEventHandler>,
        client_id: ClientId,
    ) -> EventSubscriptionState {
        let Some(eventgroup_id) = self.deployment.eventgroup_of(event_id) else {
            error!("No eventgroup found for event id {event_id}");
            return EventSubscriptionState::NotSubscribed;
        };

        self.dispatcher
            .subscribe_someip_event(event_id, observer.clone(), client_id);

        let entry = self
            .eventgroup_map
            .get_mut(&eventgroup_id)
            .unwrap_or_else(|| panic!("Eventgroup {eventgroup_id} is not configured"));
        entry.subscribe(event_id);
        let mut result = entry.subscription_state();

        if !self.communication_only {
            self.with_manager(|manager, ctx| manager.on_subscribe(eventgroup_id, ctx));
            observer.on_someip_subscription_state_change(
                self.service_instance_id(),
                event_id,
                result,
            );
        } else {
            // With static SD the service is offered from initialization
            // until shutdown; subscriptions always complete.
            assert!(self.is_offered(), "Static SD not initialized");
            debug!("Static SD subscription request for event {event_id}");
            result = EventSubscriptionState::Subscribed;
            let eventgroups: Vec<EventgroupId> = self.eventgroup_map.keys().copied().collect();
            for eg in eventgroups {
                self.on_subscription_completed(eg);
            }
        }

        result
    }

    /// Subscribe a local application to a signal-based (PDU) event.
    pub fn subscribe_pdu_event(
        &mut self,
        event_id: EventId,
        observer: Rc<dyn PduEventHandler>,
    ) -> EventSubscriptionState {
        let Some(eventgroup_id) = self.deployment.eventgroup_of(event_id) else {
            error!("No eventgroup found for event id {event_id}");
            return EventSubscriptionState::NotSubscribed;
        };

        self.dispatcher.subscribe_pdu_event(event_id, observer.clone());

        let entry = self
            .eventgroup_map
            .get_mut(&eventgroup_id)
            .unwrap_or_else(|| panic!("Eventgroup {eventgroup_id} is not configured"));
        entry.subscribe(event_id);
        let mut result = entry.subscription_state();

        if !self.communication_only {
            self.with_manager(|manager, ctx| manager.on_subscribe(eventgroup_id, ctx));
            observer.on_pdu_subscription_state_change(self.service_instance_id(), event_id, result);
        } else {
            assert!(self.is_offered(), "Static SD not initialized");
            result = EventSubscriptionState::Subscribed;
            let eventgroups: Vec<EventgroupId> = self.eventgroup_map.keys().copied().collect();
            for eg in eventgroups {
                self.on_subscription_completed(eg);
            }
        }

        result
    }

    /// Unsubscribe a local application from a SOME/IP event.
    ///
    /// Unsubscribing an observer that is not registered is a no-op.
    pub fn unsubscribe_someip_event(
        &mut self,
        event_id: EventId,
        observer: &Rc<dyn SomeIpEventHandler>,
    ) {
        let Some(eventgroup_id) = self.deployment.eventgroup_of(event_id) else {
            error!("No eventgroup found for event id {event_id}");
            return;
        };

        if !self.dispatcher.unsubscribe_someip_event(event_id, observer) {
            return;
        }

        self.finish_unsubscribe(event_id, eventgroup_id);
    }

    /// Unsubscribe a local application from a PDU event.
    pub fn unsubscribe_pdu_event(&mut self, event_id: EventId, observer: &Rc<dyn PduEventHandler>) {
        let Some(eventgroup_id) = self.deployment.eventgroup_of(event_id) else {
            error!("No eventgroup found for event id {event_id}");
            return;
        };

        if !self.dispatcher.unsubscribe_pdu_event(event_id, observer) {
            return;
        }

        self.finish_unsubscribe(event_id, eventgroup_id);
    }

    fn finish_unsubscribe(&mut self, event_id: EventId, eventgroup_id: EventgroupId) {
        if let Some(entry) = self.eventgroup_map.get_mut(&eventgroup_id) {
            entry.unsubscribe(event_id);
        }

        if !self.communication_only {
            self.with_manager(|manager, ctx| manager.on_unsubscribe(eventgroup_id, ctx));
        }

        // Without local subscribers the cached field values of this
        // eventgroup are stale.
        let no_subscribers = self
            .eventgroup_map
            .get(&eventgroup_id)
            .is_some_and(|e| !e.has_subscribers());
        if no_subscribers {
            self.invalidate_eventgroup_field_caches(eventgroup_id);
        }
    }

    /// A service offer for this instance has been received via dynamic SD.
    pub fn on_offer_remote_service(&mut self, offer: ActiveOfferEntry) {
        assert!(!self.communication_only, "Offer with static SD configured");

        let address = offer.service_address();

        // A changed provider address invalidates the current connections.
        let address_changed = self
            .remote_server_address
            .is_some_and(|previous| previous != address);
        if address_changed && self.connection_manager.is_some() {
            debug!("Offer with changed provider address, reconnecting");
            self.disconnect();
        }

        let is_multicast = offer.is_multicast;
        self.active_offer = Some(offer.clone());
        self.remote_server_address = Some(address);
        self.connect();

        self.with_manager(|manager, ctx| manager.on_offer_service(offer, is_multicast, ctx));
    }

    /// An offer renewal has been received via dynamic SD.
    ///
    /// Re-issues the connection attempt to cover broken connections and
    /// forwards the cached offer to the eventgroup manager.
    pub fn on_offer_renewal(&mut self, is_multicast: bool) {
        assert!(!self.communication_only, "Offer renewal with static SD configured");
        // Renewals can only follow an initial offer.
        let Some(offer) = self.active_offer.clone() else {
            error!("Offer renewal without an active offer");
            panic!("Offer renewal without an active offer");
        };

        self.connect();
        self.with_manager(|manager, ctx| manager.on_offer_service(offer, is_multicast, ctx));
    }

    /// The offer for this instance has been withdrawn.
    pub fn on_stop_offer_remote_service(&mut self) {
        assert!(!self.communication_only, "Stop offer with static SD configured");

        self.remote_server_address = None;
        self.active_offer = None;
        self.disconnect();

        self.with_manager(|manager, ctx| manager.on_stop_offer_service(ctx));

        if !self.deployment.event_groups.is_empty() {
            for event in self.deployment.events.clone() {
                if event.is_signal_based {
                    self.dispatcher.notify_pdu_subscription_state(
                        event.event_id,
                        EventSubscriptionState::SubscriptionPending,
                    );
                } else {
                    self.dispatcher.notify_someip_subscription_state(
                        event.event_id,
                        EventSubscriptionState::SubscriptionPending,
                    );
                }
                if event.is_field {
                    self.dispatcher.invalidate_field_cache_entry(event.event_id);
                }
            }
        }
    }

    /// A SubscribeEventgroupAck for this instance has been received.
    pub fn on_subscribe_eventgroup_ack(
        &mut self,
        eventgroup_id: EventgroupId,
        multicast_endpoint: Option<EndpointAddress>,
    ) {
        assert!(!self.communication_only, "ACK with static SD configured");
        self.with_manager(|manager, ctx| {
            manager.on_subscribe_eventgroup_ack(eventgroup_id, multicast_endpoint, ctx)
        });
    }

    /// A SubscribeEventgroupNack for this instance has been received.
    ///
    /// When the eventgroup carries TCP events the connection is closed: the
    /// remote signalled an inconsistent subscription state. Observers are
    /// demoted to pending and field caches invalidated.
    pub fn on_subscribe_eventgroup_nack(&mut self, eventgroup_id: EventgroupId) {
        assert!(!self.communication_only, "NACK with static SD configured");

        let state = self
            .eventgroup_manager
            .as_ref()
            .map(|m| m.subscription_state(eventgroup_id));
        if state == Some(EventSubscriptionState::NotSubscribed) {
            return;
        }

        self.with_manager(|manager, ctx| manager.on_subscribe_eventgroup_nack(eventgroup_id, ctx));

        if self
            .deployment
            .eventgroup_contains_proto(eventgroup_id, TransportProtocol::Tcp)
        {
            self.disconnect();
        }

        self.notify_eventgroup_observers(eventgroup_id, EventSubscriptionState::SubscriptionPending);
        self.invalidate_eventgroup_field_caches(eventgroup_id);
    }

    /// Send a method request to the provider.
    ///
    /// Attaches the configured UDP accumulation timeout of the method, if
    /// any, before handing the packet to the connection manager.
    pub fn send_method_request(&mut self, message: SomeIpMessage) -> Result<()> {
        let method_id = message.header.method_id;
        trace!(
            "Send request (service: {}, instance: {}, method: {method_id})",
            message.header.service_id,
            self.instance_id
        );

        // An active offer is a prerequisite for a connection, so a
        // connected instance is always offered.
        if self.is_connected() {
            let Some(deployment) = self.deployment.method(method_id).copied() else {
                return Err(SomeIpError::UnknownMethod(method_id.0));
            };

            let mut packet = Packet::new(message);
            if let Some(timeout) = self.method_accumulation_timeouts.get(&method_id) {
                packet.set_accumulation_timeout(Some(*timeout));
            }

            match &mut self.connection_manager {
                Some(connection) => connection.send_request(deployment.transport_protocol, &packet),
                None => Err(SomeIpError::ConnectionNotAvailable),
            }
        } else if !self.is_offered() {
            Err(SomeIpError::ServiceNotOffered)
        } else {
            Err(SomeIpError::ConnectionNotAvailable)
        }
    }

    /// Initialize static service discovery.
    ///
    /// Simulates an offer at the configured remote address and joins the
    /// event multicast group when configured. Panics when called with
    /// dynamic SD enabled.
    pub fn initialize_static_sd(
        &mut self,
        remote_server_address: ServiceAddress,
        event_multicast_endpoint: Option<EndpointAddress>,
    ) {
        if !self.communication_only {
            error!("InitializeStaticSD is only allowed with static SD");
            panic!("InitializeStaticSD is only allowed with static SD");
        }

        self.remote_server_address = Some(remote_server_address);
        self.connect();

        if let Some(multicast) = event_multicast_endpoint {
            let Some(udp_endpoint) = remote_server_address.udp_endpoint else {
                error!("Static SD multicast configured without a remote UDP endpoint");
                panic!("Static SD multicast configured without a remote UDP endpoint");
            };
            // Errors are reported inside the listener.
            let _ = self
                .multicast_listener
                .borrow_mut()
                .start_listen_for_multicast_eventgroup(
                    multicast.address,
                    multicast.port,
                    udp_endpoint.address,
                    udp_endpoint.port,
                );
        }
    }

    /// Whether the aggregate transport connection is established.
    ///
    /// Multicast-only instances are always considered connected.
    pub fn is_connected(&self) -> bool {
        aggregate_is_connected(self.connection_manager.as_ref(), self.is_multicast_only)
    }

    /// Route an incoming SOME/IP event notification to its observers.
    pub fn on_someip_event(&mut self, instance_id: InstanceId, message: &SomeIpMessage) {
        self.dispatcher.on_someip_event(instance_id, message);
    }

    /// Route an incoming PDU event notification to its observers.
    pub fn on_pdu_event(&mut self, instance_id: InstanceId, message: &SomeIpMessage) {
        self.dispatcher.on_pdu_event(instance_id, message);
    }

    /// A per-protocol transport connection state change.
    pub fn on_connection_state_change(
        &mut self,
        protocol: TransportProtocol,
        state: ConnectionState,
    ) {
        let transition = self
            .connection_manager
            .as_mut()
            .and_then(|cm| cm.on_connection_state_change(protocol, state));

        match transition {
            Some(AggregateTransition::Established) => self.handle_connection_established(),
            Some(AggregateTransition::Closed) => self.handle_connection_closed(),
            None => {}
        }
    }

    /// A retry timer owned by the eventgroup manager fired.
    pub fn on_retry_timer(&mut self, timer: TimerHandle) {
        if self.eventgroup_manager.is_some() {
            self.with_manager(|manager, ctx| manager.on_retry_timer(timer, ctx));
        }
    }

    /// The deferred-cleanup software event fired: tear down the closed
    /// connection outside of its own callback.
    pub fn on_cleanup_event(&mut self) {
        self.disconnect();
    }

    /// The aggregate connection came up.
    fn handle_connection_established(&mut self) {
        debug!("Connection with the server is established");
        // Connections only exist while the service is offered.
        debug_assert!(self.is_offered());
        self.on_connected();
    }

    /// The aggregate connection went down.
    ///
    /// Schedules the cleanup via the reactor software event: the connection
    /// object must not be destroyed from within its own callback. A trigger
    /// failure is fatal.
    fn handle_connection_closed(&mut self) {
        debug!("Connection with the server has been closed");
        if let Err(e) = self
            .reactor
            .borrow_mut()
            .trigger_software_event(self.sw_event_cleanup)
        {
            error!("Failed to trigger the reactor software event: {e}");
            panic!("Failed to trigger the reactor software event: {e}");
        }
    }

    fn on_connected(&mut self) {
        if !self.communication_only {
            self.with_manager(|manager, ctx| manager.on_connection_established(ctx));
        } else {
            let eventgroups: Vec<EventgroupId> = self.eventgroup_map.keys().copied().collect();
            for eg in eventgroups {
                self.on_subscription_completed(eg);
            }
        }
    }

    /// Create the connection manager if needed and catch up on a missed
    /// connection establishment.
    fn connect(&mut self) {
        assert!(
            self.remote_server_address.is_some(),
            "Connect without an active offer"
        );

        if self.connection_manager.is_none()
            && (self.tcp_connection_required || self.udp_connection_required)
        {
            let address = self
                .remote_server_address
                .as_ref()
                .copied()
                .unwrap_or_default();
            let mut factory = self.transport_factory.borrow_mut();
            match RemoteServerConnectionManager::new(
                &mut *factory,
                &self.network,
                &address,
                self.tcp_connection_required,
                self.udp_connection_required,
            ) {
                Ok(connection) => {
                    drop(factory);
                    // With dynamic SD, the locally assigned TCP endpoint goes
                    // into subscription entries and must reach the builder.
                    if self.tcp_connection_required && !self.communication_only {
                        if let (Some(endpoint), Some(manager)) =
                            (connection.local_tcp_endpoint(), self.eventgroup_manager.as_mut())
                        {
                            manager.register_local_tcp_endpoint(endpoint);
                        }
                    }
                    self.connection_manager = Some(connection);
                }
                Err(e) => {
                    error!("Failed to create the connection manager: {e}");
                }
            }
        }

        // Other service instances may share the connection; a missed state
        // change is caught up here.
        if self.is_connected() {
            self.on_connected();
        }
    }

    /// Tear down the connection and demote every eventgroup subscription.
    fn disconnect(&mut self) {
        debug!("Closing connection with the server");

        if !self.communication_only && self.eventgroup_manager.is_some() {
            self.with_manager(|manager, ctx| manager.on_connection_closed(ctx));
        }

        if !self.eventgroup_map.is_empty() {
            self.reset_eventgroup_subscription_states();
        }

        // Dropping the manager closes the senders.
        self.connection_manager = None;
    }

    fn is_offered(&self) -> bool {
        self.remote_server_address
            .is_some_and(|address| address.is_reachable())
    }

    /// Demote every eventgroup to pending and notify all observers.
    fn reset_eventgroup_subscription_states(&mut self) {
        trace!("Updating event subscription state for all events to SubscriptionPending");
        for entry in self.eventgroup_map.values_mut() {
            entry.on_subscription_cancelled();
        }
        for event in self.deployment.events.clone() {
            if event.is_signal_based {
                self.dispatcher.notify_pdu_subscription_state(
                    event.event_id,
                    EventSubscriptionState::SubscriptionPending,
                );
            } else {
                self.dispatcher.notify_someip_subscription_state(
                    event.event_id,
                    EventSubscriptionState::SubscriptionPending,
                );
            }
        }
    }

    /// Mark an eventgroup subscribed and notify its observers.
    fn on_subscription_completed(&mut self, eventgroup_id: EventgroupId) {
        if let Some(entry) = self.eventgroup_map.get_mut(&eventgroup_id) {
            entry.on_subscription_accepted();
        }
        self.notify_eventgroup_observers(eventgroup_id, EventSubscriptionState::Subscribed);
    }

    /// Notify the observers of every event in an eventgroup.
    fn notify_eventgroup_observers(
        &self,
        eventgroup_id: EventgroupId,
        state: EventSubscriptionState,
    ) {
        notify_eventgroup_observers(&self.deployment, &self.dispatcher, eventgroup_id, state);
    }

    fn invalidate_eventgroup_field_caches(&mut self, eventgroup_id: EventgroupId) {
        let Some(eventgroup) = self.deployment.event_groups.get(&eventgroup_id) else {
            return;
        };
        for event_id in eventgroup.events.clone() {
            self.dispatcher.invalidate_field_cache_entry(event_id);
        }
    }

    /// Run a closure with the eventgroup manager and a context borrowing the
    /// remaining coordinator state.
    ///
    /// Panics with dynamic SD not configured; callers gate on
    /// `communication_only`.
    fn with_manager<R>(
        &mut self,
        f: impl FnOnce(&mut EventgroupManager, &mut dyn EventgroupManagerContext) -> R,
    ) -> R {
        let Some(manager) = self.eventgroup_manager.as_mut() else {
            panic!("Eventgroup manager requires dynamic service discovery");
        };
        let mut ctx = CoordinatorContext {
            connection_manager: self.connection_manager.as_ref(),
            is_multicast_only: self.is_multicast_only,
            eventgroup_map: &mut self.eventgroup_map,
            dispatcher: &mut self.dispatcher,
            deployment: &self.deployment,
        };
        f(manager, &mut ctx)
    }
}

impl Drop for RemoteServer {
    /// Disconnects, unregisters from the packet router and the SD client and
    /// releases the cleanup software event. An unregistration failure of the
    /// software event is fatal.
    fn drop(&mut self) {
        debug!("Destroying RemoteServer for instance {}", self.instance_id);
        self.disconnect();

        self.packet_router
            .borrow_mut()
            .unregister_remote_server(self.service_instance_id());

        if !self.communication_only {
            if let Some(sd_client) = &self.service_discovery_client {
                sd_client
                    .borrow_mut()
                    .unregister_remote_server(self.instance_id);
            }
        }

        if let Err(e) = self
            .reactor
            .borrow_mut()
            .unregister_software_event(self.sw_event_cleanup)
        {
            error!("Failed to unregister the reactor software event: {e}");
            panic!("Failed to unregister the reactor software event: {e}");
        }
    }
}

/// Aggregate connectivity check shared by the coordinator and its manager
/// context.
fn aggregate_is_connected(
    connection_manager: Option<&RemoteServerConnectionManager>,
    is_multicast_only: bool,
) -> bool {
    match connection_manager {
        Some(connection) => connection.connection_state() == ConnectionState::Connected,
        // Multicast-only communication needs no connection.
        None => is_multicast_only,
    }
}

fn notify_eventgroup_observers(
    deployment: &ServiceDeployment,
    dispatcher: &ClientEventDispatcher,
    eventgroup_id: EventgroupId,
    state: EventSubscriptionState,
) {
    debug!("Eventgroup {eventgroup_id} subscription state updated to {state:?}");
    let Some(eventgroup) = deployment.event_groups.get(&eventgroup_id) else {
        return;
    };
    for event_id in &eventgroup.events {
        let Some(event) = deployment.event(*event_id) else {
            continue;
        };
        if event.is_signal_based {
            dispatcher.notify_pdu_subscription_state(*event_id, state);
        } else {
            dispatcher.notify_someip_subscription_state(*event_id, state);
        }
    }
}

/// Context handed to the eventgroup manager while it runs.
struct CoordinatorContext<'a> {
    connection_manager: Option<&'a RemoteServerConnectionManager>,
    is_multicast_only: bool,
    eventgroup_map: &'a mut BTreeMap<EventgroupId, RemoteServerEventgroup>,
    dispatcher: &'a mut ClientEventDispatcher,
    deployment: &'a ServiceDeployment,
}

impl EventgroupManagerContext for CoordinatorContext<'_> {
    fn is_connected(&self) -> bool {
        aggregate_is_connected(self.connection_manager, self.is_multicast_only)
    }

    fn on_eventgroup_subscribed(&mut self, eventgroup_id: EventgroupId) {
        if let Some(entry) = self.eventgroup_map.get_mut(&eventgroup_id) {
            entry.on_subscription_accepted();
        }
        notify_eventgroup_observers(
            self.deployment,
            self.dispatcher,
            eventgroup_id,
            EventSubscriptionState::Subscribed,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::{
        FakeReactor, FakeScheduler, FakeTimerManager, FakeTransportFactory, RecordingObserver,
        SenderState,
    };
    use crate::config::{
        EventDeployment, EventgroupDeployment, EventgroupTimingConfig, MethodDeployment,
        ServiceDeploymentId, SubscribeRetryConfig,
    };
    use crate::header::ServiceId;
    use std::net::{IpAddr, Ipv4Addr};

    const EVENT_UDP: EventId = EventId(0x8001);
    const EVENT_TCP: EventId = EventId(0x9001);
    const EG_UDP: EventgroupId = EventgroupId(0x0010);
    const EG_TCP: EventgroupId = EventgroupId(0x0020);
    const METHOD: MethodId = MethodId(0x0001);

    #[derive(Default)]
    struct FakeRouter {
        registered: Vec<ServiceInstanceId>,
        unregistered: Vec<ServiceInstanceId>,
    }

    impl PacketRouter for FakeRouter {
        fn register_remote_server(&mut self, service_instance_id: ServiceInstanceId) {
            self.registered.push(service_instance_id);
        }

        fn unregister_remote_server(&mut self, service_instance_id: ServiceInstanceId) {
            self.unregistered.push(service_instance_id);
        }
    }

    #[derive(Default)]
    struct FakeSdRegistry {
        registered: Vec<InstanceId>,
        unregistered: Vec<InstanceId>,
    }

    impl ServiceDiscoveryClient for FakeSdRegistry {
        fn register_remote_server(&mut self, instance_id: InstanceId) {
            self.registered.push(instance_id);
        }

        fn unregister_remote_server(&mut self, instance_id: InstanceId) {
            self.unregistered.push(instance_id);
        }
    }

    struct Harness {
        scheduler: Rc<RefCell<FakeScheduler>>,
        timers: Rc<RefCell<FakeTimerManager>>,
        reactor: Rc<RefCell<FakeReactor>>,
        factory: Rc<RefCell<FakeTransportFactory>>,
        router: Rc<RefCell<FakeRouter>>,
        sd_registry: Rc<RefCell<FakeSdRegistry>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                scheduler: Rc::new(RefCell::new(FakeScheduler::default())),
                timers: Rc::new(RefCell::new(FakeTimerManager::default())),
                reactor: Rc::new(RefCell::new(FakeReactor::default())),
                factory: Rc::new(RefCell::new(FakeTransportFactory::default())),
                router: Rc::new(RefCell::new(FakeRouter::default())),
                sd_registry: Rc::new(RefCell::new(FakeSdRegistry::default())),
            }
        }

        fn server(&self, config: RemoteServerConfig) -> RemoteServer {
            RemoteServer::new(
                config,
                self.router.clone(),
                Some(self.sd_registry.clone()),
                self.scheduler.clone(),
                self.timers.clone(),
                self.reactor.clone(),
                self.factory.clone(),
            )
        }
    }

    fn local_address() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))
    }

    fn deployment(tcp_is_field: bool) -> ServiceDeployment {
        ServiceDeployment {
            deployment_id: ServiceDeploymentId {
                service_id: ServiceId(0x1234),
                major_version: 1,
                minor_version: 0,
            },
            events: vec![
                EventDeployment {
                    event_id: EVENT_UDP,
                    transport_protocol: TransportProtocol::Udp,
                    is_field: false,
                    is_signal_based: false,
                },
                EventDeployment {
                    event_id: EVENT_TCP,
                    transport_protocol: TransportProtocol::Tcp,
                    is_field: tcp_is_field,
                    is_signal_based: false,
                },
            ],
            event_groups: BTreeMap::from([
                (
                    EG_UDP,
                    EventgroupDeployment {
                        events: vec![EVENT_UDP],
                    },
                ),
                (
                    EG_TCP,
                    EventgroupDeployment {
                        events: vec![EVENT_TCP],
                    },
                ),
            ]),
            methods: vec![MethodDeployment {
                method_id: METHOD,
                transport_protocol: TransportProtocol::Udp,
            }],
        }
    }

    fn udp_only_config() -> RemoteServerConfig {
        let mut deployment = deployment(false);
        deployment.events.truncate(1);
        deployment.event_groups.remove(&EG_TCP);
        RemoteServerConfig {
            deployment,
            instance_id: InstanceId(0x0001),
            network: RequiredNetworkEndpoint {
                address: local_address(),
                tcp_port: None,
                udp_port: Some(30501),
            },
            required_eventgroups: BTreeMap::from([(
                EG_UDP,
                Some(EventgroupTimingConfig {
                    ttl: 5,
                    request_response_delay: None,
                    retry: None,
                }),
            )]),
            communication_only: false,
            method_accumulation_timeouts: HashMap::new(),
            custom_subscription_endpoints: ServiceAddress::default(),
        }
    }

    fn tcp_config() -> RemoteServerConfig {
        RemoteServerConfig {
            deployment: deployment(true),
            instance_id: InstanceId(0x0001),
            network: RequiredNetworkEndpoint {
                address: local_address(),
                tcp_port: Some(40000),
                udp_port: Some(30501),
            },
            required_eventgroups: BTreeMap::from([(EG_UDP, None), (EG_TCP, None)]),
            communication_only: false,
            method_accumulation_timeouts: HashMap::new(),
            custom_subscription_endpoints: ServiceAddress::default(),
        }
    }

    fn retry_config() -> RemoteServerConfig {
        let mut config = udp_only_config();
        config.required_eventgroups.insert(
            EG_UDP,
            Some(EventgroupTimingConfig {
                ttl: 5,
                request_response_delay: None,
                retry: Some(SubscribeRetryConfig {
                    delay: Duration::from_millis(50),
                    max_retries: 2,
                }),
            }),
        );
        config
    }

    fn offer(tcp: bool, udp: bool, is_multicast: bool) -> ActiveOfferEntry {
        ActiveOfferEntry {
            sd_source: "192.0.2.10:30490".parse().unwrap(),
            service_id: ServiceId(0x1234),
            instance_id: InstanceId(0x0001),
            major_version: 1,
            minor_version: 0,
            ttl: 3,
            tcp_endpoint: tcp.then(|| {
                EndpointAddress::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)), 30509)
            }),
            udp_endpoint: udp.then(|| {
                EndpointAddress::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)), 30500)
            }),
            is_multicast,
        }
    }

    fn seed_connecting_udp(harness: &Harness) {
        harness.factory.borrow_mut().udp_state = Some(SenderState::new(
            ConnectionState::Connecting,
            EndpointAddress::new(local_address(), 30501),
        ));
    }

    fn seed_connecting_tcp(harness: &Harness) {
        harness.factory.borrow_mut().tcp_state = Some(SenderState::new(
            ConnectionState::Connecting,
            EndpointAddress::new(local_address(), 40000),
        ));
    }

    fn event_message(event_id: EventId, payload: &[u8]) -> SomeIpMessage {
        SomeIpMessage::notification(ServiceId(0x1234), MethodId(event_id.0))
            .payload(payload.to_vec())
            .build()
    }

    #[test]
    fn test_s1_dynamic_sd_udp_only_eventgroup() {
        let harness = Harness::new();
        seed_connecting_udp(&harness);
        let mut server = harness.server(udp_only_config());
        let observer = Rc::new(RecordingObserver::default());

        let state =
            server.subscribe_someip_event(EVENT_UDP, observer.clone(), ClientId(0x0100));
        assert_eq!(state, EventSubscriptionState::SubscriptionPending);

        server.on_offer_remote_service(offer(false, true, true));
        server.on_connection_state_change(TransportProtocol::Udp, ConnectionState::Connected);
        server.on_subscribe_eventgroup_ack(EG_UDP, None);

        // Exactly one SubscribeEventgroup went to the offer source.
        let scheduler = harness.scheduler.borrow();
        assert_eq!(scheduler.subscribes.len(), 1);
        let (entry, min_delay, max_delay, destination) = &scheduler.subscribes[0];
        assert_eq!(entry.service_id, ServiceId(0x1234));
        assert_eq!(entry.instance_id, InstanceId(0x0001));
        assert_eq!(entry.major_version, 1);
        assert_eq!(entry.eventgroup_id, EG_UDP);
        assert_eq!(entry.ttl, 5);
        assert_eq!(entry.tcp_endpoint, None);
        assert_eq!(
            entry.udp_endpoint,
            Some(EndpointAddress::new(local_address(), 30501))
        );
        assert_eq!(*min_delay, Duration::ZERO);
        assert_eq!(*max_delay, Duration::ZERO);
        assert_eq!(*destination, "192.0.2.10:30490".parse().unwrap());

        // Observer saw the transitions Pending then Subscribed.
        assert_eq!(
            observer.states.borrow().as_slice(),
            &[
                (EVENT_UDP, EventSubscriptionState::SubscriptionPending),
                (EVENT_UDP, EventSubscriptionState::Subscribed),
            ]
        );
        assert!(server.is_connected());
    }

    #[test]
    fn test_s2_nack_disconnects_tcp() {
        let harness = Harness::new();
        seed_connecting_tcp(&harness);
        let mut server = harness.server(tcp_config());
        let observer = Rc::new(RecordingObserver::default());

        server.subscribe_someip_event(EVENT_TCP, observer.clone(), ClientId(0x0100));
        server.on_offer_remote_service(offer(true, true, false));
        server.on_connection_state_change(TransportProtocol::Tcp, ConnectionState::Connected);
        assert!(server.is_connected());
        assert_eq!(harness.scheduler.borrow().subscribes.len(), 1);

        // A field value arrives and is cached.
        server.on_someip_event(InstanceId(0x0001), &event_message(EVENT_TCP, b"field"));
        assert!(server.dispatcher.has_cached_field_value(EVENT_TCP));

        server.on_subscribe_eventgroup_nack(EG_TCP);

        assert!(server.connection_manager.is_none());
        assert!(!server.is_connected());
        assert!(!server.dispatcher.has_cached_field_value(EVENT_TCP));
        assert_eq!(
            observer.states.borrow().last(),
            Some(&(EVENT_TCP, EventSubscriptionState::SubscriptionPending))
        );
    }

    #[test]
    fn test_s3_retry_exhaustion() {
        let harness = Harness::new();
        seed_connecting_udp(&harness);
        let mut server = harness.server(retry_config());
        let observer = Rc::new(RecordingObserver::default());

        server.subscribe_someip_event(EVENT_UDP, observer.clone(), ClientId(0x0100));
        server.on_offer_remote_service(offer(false, true, false));
        server.on_connection_state_change(TransportProtocol::Udp, ConnectionState::Connected);
        assert_eq!(harness.scheduler.borrow().subscribes.len(), 1);

        // Nack -> timer -> re-send, until the budget of two retries is spent.
        server.on_subscribe_eventgroup_nack(EG_UDP);
        let timer = *harness.timers.borrow().started.first().unwrap();
        server.on_retry_timer(timer);
        assert_eq!(harness.scheduler.borrow().subscribes.len(), 2);

        server.on_subscribe_eventgroup_nack(EG_UDP);
        server.on_retry_timer(timer);
        assert_eq!(harness.scheduler.borrow().subscribes.len(), 3);

        server.on_subscribe_eventgroup_nack(EG_UDP);
        server.on_retry_timer(timer);

        // No further Subscribe until the next offer renewal.
        assert_eq!(harness.scheduler.borrow().subscribes.len(), 3);
        assert_eq!(
            server
                .eventgroup_manager
                .as_ref()
                .unwrap()
                .subscription_state(EG_UDP),
            EventSubscriptionState::NotSubscribed
        );
        assert!(
            !observer
                .states
                .borrow()
                .iter()
                .any(|(_, s)| *s == EventSubscriptionState::Subscribed)
        );
    }

    #[test]
    fn test_s4_multicast_ack_without_udp_offer_is_dropped() {
        let harness = Harness::new();
        seed_connecting_tcp(&harness);
        let mut config = tcp_config();
        config.required_eventgroups.remove(&EG_UDP);
        config.deployment.methods.clear();
        config.network.udp_port = None;
        let mut server = harness.server(config);
        let observer = Rc::new(RecordingObserver::default());

        server.subscribe_someip_event(EVENT_TCP, observer, ClientId(0x0100));
        server.on_offer_remote_service(offer(true, false, false));
        server.on_connection_state_change(TransportProtocol::Tcp, ConnectionState::Connected);
        assert_eq!(harness.scheduler.borrow().subscribes.len(), 1);

        let multicast =
            EndpointAddress::new(IpAddr::V4(Ipv4Addr::new(239, 1, 2, 3)), 30000);
        server.on_subscribe_eventgroup_ack(EG_TCP, Some(multicast));

        assert!(harness.factory.borrow().multicast_log.borrow().joins.is_empty());
        assert_eq!(
            server
                .eventgroup_manager
                .as_ref()
                .unwrap()
                .subscription_state(EG_TCP),
            EventSubscriptionState::SubscriptionPending
        );
    }

    #[test]
    fn test_s5_static_sd_initialization() {
        let harness = Harness::new();
        let mut config = udp_only_config();
        config.communication_only = true;
        let mut server = RemoteServer::new(
            config,
            harness.router.clone(),
            None,
            harness.scheduler.clone(),
            harness.timers.clone(),
            harness.reactor.clone(),
            harness.factory.clone(),
        );

        let remote = ServiceAddress::new(
            Some(EndpointAddress::new(
                IpAddr::V4(Ipv4Addr::new(192, 0, 2, 11)),
                30509,
            )),
            Some(EndpointAddress::new(
                IpAddr::V4(Ipv4Addr::new(192, 0, 2, 11)),
                30508,
            )),
        );
        let multicast =
            EndpointAddress::new(IpAddr::V4(Ipv4Addr::new(239, 1, 2, 3)), 30000);
        server.initialize_static_sd(remote, Some(multicast));

        {
            let factory = harness.factory.borrow();
            let log = factory.multicast_log.borrow();
            assert_eq!(
                log.joins.as_slice(),
                &[(
                    IpAddr::V4(Ipv4Addr::new(239, 1, 2, 3)),
                    IpAddr::V4(Ipv4Addr::new(192, 0, 2, 11)),
                    30508,
                )]
            );
        }

        // Subscriptions report Subscribed immediately.
        let observer = Rc::new(RecordingObserver::default());
        let state =
            server.subscribe_someip_event(EVENT_UDP, observer.clone(), ClientId(0x0100));
        assert_eq!(state, EventSubscriptionState::Subscribed);
        assert!(
            observer
                .states
                .borrow()
                .iter()
                .any(|(_, s)| *s == EventSubscriptionState::Subscribed)
        );
        // No SD traffic with static SD.
        assert!(harness.scheduler.borrow().subscribes.is_empty());

        let log = harness.factory.borrow().multicast_log.clone();
        drop(server);
        // Shutdown leaves the group exactly once.
        assert_eq!(log.borrow().leaves.len(), 1);
    }

    #[test]
    fn test_disconnect_is_deferred_to_cleanup_event() {
        let harness = Harness::new();
        seed_connecting_udp(&harness);
        let mut server = harness.server(udp_only_config());

        server.subscribe_someip_event(
            EVENT_UDP,
            Rc::new(RecordingObserver::default()),
            ClientId(0x0100),
        );
        server.on_offer_remote_service(offer(false, true, false));
        server.on_connection_state_change(TransportProtocol::Udp, ConnectionState::Connected);

        server.on_connection_state_change(TransportProtocol::Udp, ConnectionState::Disconnected);

        // The connection objects survive the callback; only the software
        // event is triggered.
        assert!(server.connection_manager.is_some());
        assert_eq!(harness.reactor.borrow().triggered.len(), 1);

        server.on_cleanup_event();
        assert!(server.connection_manager.is_none());
    }

    #[test]
    fn test_stop_offer_resets_everything() {
        let harness = Harness::new();
        seed_connecting_udp(&harness);
        let mut server = harness.server(udp_only_config());
        let observer = Rc::new(RecordingObserver::default());

        server.subscribe_someip_event(EVENT_UDP, observer.clone(), ClientId(0x0100));
        server.on_offer_remote_service(offer(false, true, false));
        server.on_connection_state_change(TransportProtocol::Udp, ConnectionState::Connected);
        server.on_subscribe_eventgroup_ack(EG_UDP, None);
        assert_eq!(
            observer.states.borrow().last(),
            Some(&(EVENT_UDP, EventSubscriptionState::Subscribed))
        );

        server.on_stop_offer_remote_service();

        assert!(server.connection_manager.is_none());
        assert!(server.active_offer.is_none());
        assert_eq!(
            server
                .eventgroup_manager
                .as_ref()
                .unwrap()
                .subscription_state(EG_UDP),
            EventSubscriptionState::NotSubscribed
        );
        assert_eq!(
            observer.states.borrow().last(),
            Some(&(EVENT_UDP, EventSubscriptionState::SubscriptionPending))
        );
    }

    #[test]
    fn test_double_subscribe_sends_once() {
        let harness = Harness::new();
        seed_connecting_udp(&harness);
        let mut server = harness.server(udp_only_config());

        let first = Rc::new(RecordingObserver::default());
        let second = Rc::new(RecordingObserver::default());
        server.subscribe_someip_event(EVENT_UDP, first, ClientId(0x0100));
        server.subscribe_someip_event(EVENT_UDP, second, ClientId(0x0200));
        server.on_offer_remote_service(offer(false, true, false));

        assert_eq!(harness.scheduler.borrow().subscribes.len(), 1);
    }

    #[test]
    fn test_unsubscribe_without_observer_is_noop() {
        let harness = Harness::new();
        seed_connecting_udp(&harness);
        let mut server = harness.server(udp_only_config());

        let observer: Rc<dyn SomeIpEventHandler> = Rc::new(RecordingObserver::default());
        server.unsubscribe_someip_event(EVENT_UDP, &observer);

        assert!(harness.scheduler.borrow().stop_subscribes.is_empty());
    }

    #[test]
    fn test_last_unsubscribe_emits_stop_subscribe() {
        let harness = Harness::new();
        seed_connecting_udp(&harness);
        let mut server = harness.server(udp_only_config());

        let observer = Rc::new(RecordingObserver::default());
        let handle: Rc<dyn SomeIpEventHandler> = observer;
        server.subscribe_someip_event(EVENT_UDP, handle.clone(), ClientId(0x0100));
        server.on_offer_remote_service(offer(false, true, false));
        server.on_connection_state_change(TransportProtocol::Udp, ConnectionState::Connected);
        server.on_subscribe_eventgroup_ack(EG_UDP, None);

        server.unsubscribe_someip_event(EVENT_UDP, &handle);

        let scheduler = harness.scheduler.borrow();
        assert_eq!(scheduler.stop_subscribes.len(), 1);
        assert_eq!(scheduler.stop_subscribes[0].0.eventgroup_id, EG_UDP);
    }

    #[test]
    fn test_send_method_request_errors() {
        let harness = Harness::new();
        seed_connecting_udp(&harness);
        let mut server = harness.server(udp_only_config());

        // Not offered.
        let request = SomeIpMessage::request(ServiceId(0x1234), METHOD).build();
        assert!(matches!(
            server.send_method_request(request.clone()),
            Err(SomeIpError::ServiceNotOffered)
        ));

        // Offered but still connecting.
        server.on_offer_remote_service(offer(false, true, false));
        assert!(matches!(
            server.send_method_request(request.clone()),
            Err(SomeIpError::ConnectionNotAvailable)
        ));

        // Connected, unknown method.
        server.on_connection_state_change(TransportProtocol::Udp, ConnectionState::Connected);
        let unknown = SomeIpMessage::request(ServiceId(0x1234), MethodId(0x7777)).build();
        assert!(matches!(
            server.send_method_request(unknown),
            Err(SomeIpError::UnknownMethod(0x7777))
        ));

        // Connected, known method.
        assert!(server.send_method_request(request).is_ok());
    }

    #[test]
    fn test_method_accumulation_timeout_is_attached() {
        let harness = Harness::new();
        seed_connecting_udp(&harness);
        let mut config = udp_only_config();
        config
            .method_accumulation_timeouts
            .insert(METHOD, Duration::from_millis(10));
        let mut server = harness.server(config);

        server.on_offer_remote_service(offer(false, true, false));
        server.on_connection_state_change(TransportProtocol::Udp, ConnectionState::Connected);

        let request = SomeIpMessage::request(ServiceId(0x1234), METHOD).build();
        server.send_method_request(request).unwrap();

        let factory = harness.factory.borrow();
        let sender = factory.udp_state.as_ref().unwrap().borrow();
        assert_eq!(sender.sent.len(), 1);
        assert_eq!(
            sender.sent[0].accumulation_timeout,
            Some(Duration::from_millis(10))
        );
    }

    #[test]
    fn test_multicast_only_instance_is_always_connected() {
        let harness = Harness::new();
        let mut config = udp_only_config();
        config.network.udp_port = None;
        config.network.tcp_port = None;
        let server = harness.server(config);

        assert!(server.is_connected());
    }

    #[test]
    fn test_registration_lifecycle() {
        let harness = Harness::new();
        let server = harness.server(udp_only_config());
        let id = server.service_instance_id();

        assert_eq!(harness.router.borrow().registered.as_slice(), &[id]);
        assert_eq!(
            harness.sd_registry.borrow().registered.as_slice(),
            &[InstanceId(0x0001)]
        );
        assert_eq!(harness.reactor.borrow().registered.len(), 1);

        drop(server);
        assert_eq!(harness.router.borrow().unregistered.as_slice(), &[id]);
        assert_eq!(
            harness.sd_registry.borrow().unregistered.as_slice(),
            &[InstanceId(0x0001)]
        );
        assert_eq!(harness.reactor.borrow().unregistered.len(), 1);
    }

    #[test]
    #[should_panic(expected = "software event")]
    fn test_software_event_registration_failure_is_fatal() {
        let harness = Harness::new();
        harness.reactor.borrow_mut().fail_register = true;
        let _ = harness.server(udp_only_config());
    }

    #[test]
    #[should_panic(expected = "software event")]
    fn test_software_event_trigger_failure_is_fatal() {
        let harness = Harness::new();
        seed_connecting_udp(&harness);
        let mut server = harness.server(udp_only_config());

        server.on_offer_remote_service(offer(false, true, false));
        server.on_connection_state_change(TransportProtocol::Udp, ConnectionState::Connected);

        harness.reactor.borrow_mut().fail_trigger = true;
        server.on_connection_state_change(TransportProtocol::Udp, ConnectionState::Disconnected);
    }

    #[test]
    fn test_offer_with_changed_address_reconnects() {
        let harness = Harness::new();
        seed_connecting_udp(&harness);
        let mut server = harness.server(udp_only_config());

        server.on_offer_remote_service(offer(false, true, false));
        assert_eq!(harness.factory.borrow().udp_requests.len(), 1);

        // Same address: the existing connection is kept.
        server.on_offer_remote_service(offer(false, true, false));
        assert_eq!(harness.factory.borrow().udp_requests.len(), 1);

        // Changed provider endpoint: reset and reconnect.
        let mut moved = offer(false, true, false);
        moved.udp_endpoint =
            Some(EndpointAddress::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 20)), 30500));
        server.on_offer_remote_service(moved);
        assert_eq!(harness.factory.borrow().udp_requests.len(), 2);
    }

    #[test]
    fn test_event_routing_to_observers() {
        let harness = Harness::new();
        seed_connecting_udp(&harness);
        let mut server = harness.server(udp_only_config());
        let observer = Rc::new(RecordingObserver::default());

        server.subscribe_someip_event(EVENT_UDP, observer.clone(), ClientId(0x0100));
        server.on_someip_event(InstanceId(0x0001), &event_message(EVENT_UDP, b"data"));

        assert_eq!(
            observer.events.borrow().as_slice(),
            &[(EVENT_UDP, b"data".to_vec())]
        );
    }
}
