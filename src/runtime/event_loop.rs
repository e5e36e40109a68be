//! The node's cooperative event loop.
//!
//! One iteration:
//! 1. let the client process pending transport work,
//! 2. dispatch every drained event in arrival order,
//! 3. if connected, tick the modules and publish what they queued,
//! 4. sleep for the loop period.
//!
//! Status events are handled inline, so the subscriptions of an accepted
//! connection are requested before any message that follows it is dispatched.

use embassy_time::Duration;
use embedded_hal_async::delay::DelayNs;

use super::publisher::BufferedOutbox;
use super::registry::MAX_TOPIC_LEN;
use super::traits::MqttModule;
use crate::client::{EventQueue, MessagingClient, MqttEvent};
use crate::config::{NodeConfig, WifiCredentials};
use crate::error::SessionError;
use crate::network::{self, WifiRadio};
use crate::session::Session;
use crate::time::Clock;

/// Publishes a module may queue per iteration.
const OUTBOX_CAPACITY: usize = 4;
/// Largest payload a module may queue.
const OUTBOX_PAYLOAD_LEN: usize = 32;

/// What the caller should do after an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    Continue,
    Stop,
}

/// Owns the session and the modules and drives them.
///
/// ```ignore
/// let module = ModulePair::new(ControlDispatcher::new(led, &config), telemetry);
/// let mut runtime = NodeRuntime::new(MqttClient::<_, 1024>::new(transport), &config, module, SystemClock, Delay);
/// runtime.run_with_network(&mut radio).await?;
/// ```
pub struct NodeRuntime<C, M, K, D, const MAX_TOPICS: usize = 8>
where
    C: MessagingClient,
    M: MqttModule,
    K: Clock,
    D: DelayNs,
{
    session: Session<C, MAX_TOPICS>,
    module: M,
    clock: K,
    delay: D,
    events: EventQueue,
    outbox: BufferedOutbox<OUTBOX_CAPACITY, MAX_TOPIC_LEN, OUTBOX_PAYLOAD_LEN>,
    loop_period: Duration,
    wifi: WifiCredentials,
    association_timeout: Duration,
    association_retry_delay: Duration,
}

impl<C, M, K, D, const MAX_TOPICS: usize> NodeRuntime<C, M, K, D, MAX_TOPICS>
where
    C: MessagingClient,
    M: MqttModule,
    K: Clock,
    D: DelayNs,
{
    /// Builds the runtime and collects the modules' topics.
    pub fn new(client: C, config: &NodeConfig, module: M, clock: K, delay: D) -> Self {
        let seed = clock.now().as_ticks();
        let mut session = Session::new(client, config, seed);
        module.register(session.topics_mut());
        debug!("Registered {} topics", session.topics().len());

        Self {
            session,
            module,
            clock,
            delay,
            events: EventQueue::new(),
            outbox: BufferedOutbox::new(),
            loop_period: config.loop_period,
            wifi: config.wifi,
            association_timeout: config.association_timeout,
            association_retry_delay: config.association_retry_delay,
        }
    }

    pub fn session(&self) -> &Session<C, MAX_TOPICS> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<C, MAX_TOPICS> {
        &mut self.session
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    /// Requests the first broker connection.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        self.session.begin_connect(&mut self.delay).await
    }

    /// Runs a single loop iteration.
    pub async fn run_once(&mut self) -> Step {
        // Failures are logged by the session and surface as status events.
        let _ = self.session.process(&mut self.events).await;

        while let Some(event) = self.events.pop_front() {
            match event {
                MqttEvent::Status(status) => {
                    if let Err(e) = self.session.handle_status(status, &mut self.delay).await {
                        error!("Reconnect impossible: {:?}", e);
                    }
                }
                MqttEvent::Message(message) => {
                    if self.session.is_connected() {
                        self.module.on_message(&message);
                    } else {
                        debug!("Dropping message on {} while disconnected", message.topic.as_str());
                    }
                }
                ack => self.session.handle_ack(&ack),
            }
        }

        if self.module.stop_requested() {
            return Step::Stop;
        }

        if self.session.is_connected() {
            self.module.on_tick(self.clock.now(), &mut self.outbox);
            for request in self.outbox.iter() {
                let _ = self
                    .session
                    .publish(&request.topic, &request.payload, request.qos, request.retain)
                    .await;
            }
            self.outbox.clear();
        }

        self.delay.delay_ms(self.loop_period.as_millis() as u32).await;
        Step::Continue
    }

    /// Unsubscribes every topic and disconnects.
    pub async fn shutdown(&mut self) {
        info!("Exiting: unsubscribing and disconnecting");
        self.session.shutdown().await;
    }

    /// Connects, then loops until a module requests a stop, then shuts down.
    ///
    /// Only returns early when the broker address is invalid.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        self.start().await?;
        while self.run_once().await == Step::Continue {}
        self.shutdown().await;
        Ok(())
    }

    /// Joins the WiFi network first, then [`run`](Self::run)s.
    ///
    /// Panics if the radio cannot be initialized.
    pub async fn run_with_network<R: WifiRadio>(&mut self, radio: &mut R) -> Result<(), SessionError> {
        network::connect_or_abort(
            radio,
            &mut self.delay,
            &self.wifi,
            self.association_timeout,
            self.association_retry_delay,
        )
        .await;
        self.run().await
    }
}
