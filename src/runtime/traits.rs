//! Node module trait and utilities.
//!
//! The event loop drives the node's behaviour through the object-safe
//! `MqttModule` trait: the control dispatcher and the telemetry publisher are
//! both modules, composed with [`ModulePair`].
//!
//! # Publishing Pattern
//!
//! Modules never perform async I/O directly. Instead, they use the `PublishOutbox`
//! trait to queue publish requests. The runtime then hands them to the session
//! after the module method returns, under the transport lock.

use embassy_time::Instant;

use crate::client::InboundMessage;
use crate::packet::QoS;

/// Object-safe trait for queuing MQTT publish requests.
///
/// Modules use this to schedule publishes during `on_tick`.
/// The actual async publishing is done by the runtime after the module returns.
pub trait PublishOutbox {
    /// Queue a message for publishing.
    ///
    /// This is synchronous and returns immediately. Requests that do not fit
    /// the outbox are dropped.
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool);
}

/// Object-safe trait for collecting topics during registration.
///
/// The runtime provides this to modules during `register()`. Modules
/// call `add()` for each topic they want to subscribe to.
pub trait TopicCollector {
    /// Add a topic to subscribe to.
    ///
    /// The topic string is copied internally, so it only needs to live
    /// for the duration of this call.
    ///
    /// Returns `true` if the topic is registered, `false` if the collector is full.
    fn add(&mut self, topic: &str) -> bool;
}

/// Object-safe trait for modules that handle incoming messages and periodic work.
///
/// Key design choices for object safety:
/// - No `async fn` methods (all I/O is done via `PublishOutbox`)
/// - No generic type parameters or lifetimes on methods
/// - Callback-based topic registration
pub trait MqttModule {
    /// Register topics that this module wants to subscribe to.
    ///
    /// Called once when the runtime is built. The session subscribes to every
    /// registered topic each time the broker accepts a connection.
    fn register(&self, collector: &mut dyn TopicCollector);

    /// Handle an inbound message.
    ///
    /// Only called while the session is connected, and never before the
    /// subscriptions of the current connection have been requested.
    fn on_message(&mut self, msg: &InboundMessage);

    /// Periodic work, called once per loop iteration while connected.
    fn on_tick(&mut self, _now: Instant, _outbox: &mut dyn PublishOutbox) {}

    /// `true` once the module wants the event loop to stop.
    fn stop_requested(&self) -> bool {
        false
    }
}

/// A composite module that combines two modules into one.
///
/// Both modules receive all messages and ticks, first module first.
///
/// ```ignore
/// let node = ModulePair::new(ControlDispatcher::new(led, &config), telemetry);
/// ```
pub struct ModulePair<M1, M2> {
    pub first: M1,
    pub second: M2,
}

impl<M1, M2> ModulePair<M1, M2> {
    pub fn new(first: M1, second: M2) -> Self {
        Self { first, second }
    }
}

impl<M1, M2> MqttModule for ModulePair<M1, M2>
where
    M1: MqttModule,
    M2: MqttModule,
{
    fn register(&self, collector: &mut dyn TopicCollector) {
        self.first.register(collector);
        self.second.register(collector);
    }

    fn on_message(&mut self, msg: &InboundMessage) {
        self.first.on_message(msg);
        self.second.on_message(msg);
    }

    fn on_tick(&mut self, now: Instant, outbox: &mut dyn PublishOutbox) {
        self.first.on_tick(now, outbox);
        self.second.on_tick(now, outbox);
    }

    fn stop_requested(&self) -> bool {
        self.first.stop_requested() || self.second.stop_requested()
    }
}

/// Blanket implementation for mutable references.
///
/// This allows using `&mut dyn MqttModule` wherever `MqttModule` is expected.
impl<M: MqttModule + ?Sized> MqttModule for &mut M {
    fn register(&self, collector: &mut dyn TopicCollector) {
        (**self).register(collector)
    }

    fn on_message(&mut self, msg: &InboundMessage) {
        (**self).on_message(msg)
    }

    fn on_tick(&mut self, now: Instant, outbox: &mut dyn PublishOutbox) {
        (**self).on_tick(now, outbox)
    }

    fn stop_requested(&self) -> bool {
        (**self).stop_requested()
    }
}
