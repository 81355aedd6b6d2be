//! Dispatching of events and subscription state changes to applications.
//!
//! Observers are shared, reference-counted handles keyed by event ID. A
//! panicking observer is contained so the remaining observers still receive
//! their notifications. Field events keep a last-value cache that is
//! replayed to late subscribers and invalidated on NACK and offer loss.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{debug, error, trace};

use crate::client::eventgroup::EventSubscriptionState;
use crate::config::ServiceInstanceId;
use crate::header::{ClientId, EventId};
use crate::message::SomeIpMessage;
use crate::sd::types::InstanceId;

/// Observer of SOME/IP events and their subscription state.
pub trait SomeIpEventHandler {
    /// A SOME/IP event notification arrived.
    fn on_someip_event(&self, instance_id: InstanceId, message: &SomeIpMessage);

    /// The subscription state of an event changed.
    fn on_someip_subscription_state_change(
        &self,
        service_instance_id: ServiceInstanceId,
        event_id: EventId,
        state: EventSubscriptionState,
    );
}

/// Observer of signal-based (PDU) events and their subscription state.
pub trait PduEventHandler {
    /// A PDU event notification arrived.
    fn on_pdu_event(&self, instance_id: InstanceId, message: &SomeIpMessage);

    /// The subscription state of an event changed.
    fn on_pdu_subscription_state_change(
        &self,
        service_instance_id: ServiceInstanceId,
        event_id: EventId,
        state: EventSubscriptionState,
    );
}

/// Dispatcher of client events of one RemoteServer.
pub struct ClientEventDispatcher {
    service_instance_id: ServiceInstanceId,
    someip_observers: HashMap<EventId, Vec<(Rc<dyn SomeIpEventHandler>, ClientId)>>,
    pdu_observers: HashMap<EventId, Vec<Rc<dyn PduEventHandler>>>,
    field_events: HashSet<EventId>,
    field_cache: HashMap<EventId, SomeIpMessage>,
}

impl ClientEventDispatcher {
    /// Create a dispatcher. `field_events` are the events with last-value
    /// cache semantics.
    pub fn new(service_instance_id: ServiceInstanceId, field_events: HashSet<EventId>) -> Self {
        Self {
            service_instance_id,
            someip_observers: HashMap::new(),
            pdu_observers: HashMap::new(),
            field_events,
            field_cache: HashMap::new(),
        }
    }

    /// Register an observer for a SOME/IP event.
    ///
    /// A cached field value is replayed to the new observer immediately.
    pub fn subscribe_someip_event(
        &mut self,
        event_id: EventId,
        observer: Rc<dyn SomeIpEventHandler>,
        client_id: ClientId,
    ) {
        if let Some(cached) = self.field_cache.get(&event_id) {
            trace!("Replaying cached field value for event {event_id}");
            contained(|| observer.on_someip_event(self.service_instance_id.instance_id, cached));
        }
        self.someip_observers
            .entry(event_id)
            .or_default()
            .push((observer, client_id));
    }

    /// Remove an observer of a SOME/IP event.
    ///
    /// Returns false when the observer was not registered.
    pub fn unsubscribe_someip_event(
        &mut self,
        event_id: EventId,
        observer: &Rc<dyn SomeIpEventHandler>,
    ) -> bool {
        let mut removed = false;
        if let Some(observers) = self.someip_observers.get_mut(&event_id) {
            if let Some(pos) = observers.iter().position(|(o, _)| Rc::ptr_eq(o, observer)) {
                observers.remove(pos);
                removed = true;
            }
            if observers.is_empty() {
                self.someip_observers.remove(&event_id);
            }
        }
        removed
    }

    /// Register an observer for a PDU event.
    pub fn subscribe_pdu_event(&mut self, event_id: EventId, observer: Rc<dyn PduEventHandler>) {
        self.pdu_observers.entry(event_id).or_default().push(observer);
    }

    /// Remove an observer of a PDU event.
    ///
    /// Returns false when the observer was not registered.
    pub fn unsubscribe_pdu_event(
        &mut self,
        event_id: EventId,
        observer: &Rc<dyn PduEventHandler>,
    ) -> bool {
        let mut removed = false;
        if let Some(observers) = self.pdu_observers.get_mut(&event_id) {
            if let Some(pos) = observers.iter().position(|o| Rc::ptr_eq(o, observer)) {
                observers.remove(pos);
                removed = true;
            }
            if observers.is_empty() {
                self.pdu_observers.remove(&event_id);
            }
        }
        removed
    }

    /// Whether any observer is registered for the event.
    pub fn has_observers(&self, event_id: EventId) -> bool {
        self.someip_observers.contains_key(&event_id) || self.pdu_observers.contains_key(&event_id)
    }

    /// Route an incoming SOME/IP event notification to its observers.
    pub fn on_someip_event(&mut self, instance_id: InstanceId, message: &SomeIpMessage) {
        let event_id = EventId(message.header.method_id.0);

        if self.field_events.contains(&event_id) {
            self.field_cache.insert(event_id, message.clone());
        }

        if let Some(observers) = self.someip_observers.get(&event_id) {
            for (observer, _) in observers {
                contained(|| observer.on_someip_event(instance_id, message));
            }
        } else {
            debug!("No observers for SOME/IP event {event_id}");
        }
    }

    /// Route an incoming PDU event notification to its observers.
    pub fn on_pdu_event(&mut self, instance_id: InstanceId, message: &SomeIpMessage) {
        let event_id = EventId(message.header.method_id.0);

        if let Some(observers) = self.pdu_observers.get(&event_id) {
            for observer in observers {
                contained(|| observer.on_pdu_event(instance_id, message));
            }
        } else {
            debug!("No observers for PDU event {event_id}");
        }
    }

    /// Notify every SOME/IP observer of an event about a state change.
    pub fn notify_someip_subscription_state(&self, event_id: EventId, state: EventSubscriptionState) {
        if let Some(observers) = self.someip_observers.get(&event_id) {
            for (observer, _) in observers {
                contained(|| {
                    observer.on_someip_subscription_state_change(
                        self.service_instance_id,
                        event_id,
                        state,
                    )
                });
            }
        }
    }

    /// Notify every PDU observer of an event about a state change.
    pub fn notify_pdu_subscription_state(&self, event_id: EventId, state: EventSubscriptionState) {
        if let Some(observers) = self.pdu_observers.get(&event_id) {
            for observer in observers {
                contained(|| {
                    observer.on_pdu_subscription_state_change(
                        self.service_instance_id,
                        event_id,
                        state,
                    )
                });
            }
        }
    }

    /// Drop the cached value of a field event.
    pub fn invalidate_field_cache_entry(&mut self, event_id: EventId) {
        if self.field_cache.remove(&event_id).is_some() {
            trace!("Invalidated field cache for event {event_id}");
        }
    }

    /// Whether a cached field value exists for the event.
    pub fn has_cached_field_value(&self, event_id: EventId) -> bool {
        self.field_cache.contains_key(&event_id)
    }
}

/// Run an observer callback, containing a panic to this observer.
fn contained<F: FnOnce()>(f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("Observer callback panicked; continuing with remaining observers");
    }
}
