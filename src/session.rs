//! Messaging session supervisor.
//!
//! Owns the messaging client for the lifetime of the node and drives the broker
//! session through `Disconnected → Connecting → Connected`. Every call into the
//! client goes through the transport lock.
//!
//! The session never gives up on a reachable broker: any non-accepted status
//! puts it back in `Disconnected`, waits the retry delay, and starts a new
//! connect attempt. The only terminal error is a broker address that does not
//! parse, because retrying cannot fix configuration.

use core::net::{Ipv4Addr, SocketAddrV4};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal_async::delay::DelayNs;
use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::backoff::BackoffPolicy;
use crate::client::{ConnectionStatus, EventQueue, MessagingClient, MqttEvent, MqttOptions};
use crate::config::NodeConfig;
use crate::error::SessionError;
use crate::fmt::Dbg;
use crate::packet::QoS;
use crate::runtime::TopicRegistry;

/// Where the session stands with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    Disconnected,
    /// A connect attempt is outstanding.
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Broker {
    Unresolved,
    Resolved(SocketAddrV4),
    Invalid,
}

pub struct Session<C: MessagingClient, const MAX_TOPICS: usize = 8> {
    client: Mutex<CriticalSectionRawMutex, C>,
    options: MqttOptions,
    broker_address: &'static str,
    broker_port: u16,
    broker: Broker,
    state: SessionState,
    topics: TopicRegistry<MAX_TOPICS>,
    subscribe_qos: QoS,
    backoff: BackoffPolicy,
    attempt: u32,
    rng: SmallRng,
    last_status: Option<ConnectionStatus>,
}

impl<C: MessagingClient, const MAX_TOPICS: usize> Session<C, MAX_TOPICS> {
    /// Creates a disconnected session. `seed` feeds the retry jitter.
    pub fn new(client: C, config: &NodeConfig, seed: u64) -> Self {
        Self {
            client: Mutex::new(client),
            options: config.broker.options,
            broker_address: config.broker.address,
            broker_port: config.broker.port,
            broker: Broker::Unresolved,
            state: SessionState::Disconnected,
            topics: TopicRegistry::new(),
            subscribe_qos: config.broker.subscribe_qos,
            backoff: config.reconnect,
            attempt: 0,
            rng: SmallRng::seed_from_u64(seed),
            last_status: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// The most recent connection status reported by the client.
    pub fn last_status(&self) -> Option<ConnectionStatus> {
        self.last_status
    }

    /// Topics subscribed on every accepted connection.
    pub fn topics(&self) -> &TopicRegistry<MAX_TOPICS> {
        &self.topics
    }

    pub fn topics_mut(&mut self) -> &mut TopicRegistry<MAX_TOPICS> {
        &mut self.topics
    }

    /// Direct access to the client, bypassing the lock.
    pub fn client_mut(&mut self) -> &mut C {
        self.client.get_mut()
    }

    fn resolve_broker(&mut self) -> Result<SocketAddrV4, SessionError> {
        match self.broker {
            Broker::Resolved(addr) => Ok(addr),
            Broker::Invalid => Err(SessionError::InvalidBrokerAddress),
            Broker::Unresolved => match self.broker_address.parse::<Ipv4Addr>() {
                Ok(ip) => {
                    let addr = SocketAddrV4::new(ip, self.broker_port);
                    self.broker = Broker::Resolved(addr);
                    Ok(addr)
                }
                Err(_) => {
                    error!("Invalid broker IP: {}", self.broker_address);
                    self.broker = Broker::Invalid;
                    Err(SessionError::InvalidBrokerAddress)
                }
            },
        }
    }

    async fn wait_retry<D: DelayNs>(&mut self, delay: &mut D) {
        let wait = self.backoff.next(self.attempt, &mut self.rng);
        self.attempt = self.attempt.saturating_add(1);
        info!("Retrying MQTT connect in {} ms", wait.as_millis());
        delay.delay_ms(wait.as_millis() as u32).await;
    }

    /// Starts a connect attempt unless one is outstanding or the session is up.
    ///
    /// When the client cannot even start the attempt this waits the retry delay
    /// and tries again, so on `Ok` the session is always `Connecting` or
    /// `Connected`.
    pub async fn begin_connect<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), SessionError> {
        if self.state != SessionState::Disconnected {
            return Ok(());
        }
        let broker = self.resolve_broker()?;

        loop {
            let result = {
                let mut client = self.client.lock().await;
                client.connect(broker, &self.options).await
            };
            match result {
                Ok(()) => {
                    self.state = SessionState::Connecting;
                    info!("MQTT connect requested");
                    return Ok(());
                }
                Err(e) => {
                    warn!("MQTT connect could not start: {:?}", Dbg(&e));
                    self.wait_retry(delay).await;
                }
            }
        }
    }

    /// Applies a connection status reported by the client.
    pub async fn handle_status<D: DelayNs>(
        &mut self,
        status: ConnectionStatus,
        delay: &mut D,
    ) -> Result<(), SessionError> {
        info!("MQTT status = {}", status.code());
        self.last_status = Some(status);

        if status.is_accepted() {
            self.state = SessionState::Connected;
            self.attempt = 0;
            info!("MQTT connection accepted, subscribing to {} topics", self.topics.len());
            self.subscribe_all().await;
            return Ok(());
        }

        self.state = SessionState::Disconnected;
        warn!("MQTT session refused or lost (status {})", status.code());
        self.wait_retry(delay).await;
        self.begin_connect(delay).await
    }

    async fn subscribe_all(&mut self) {
        for topic in self.topics.iter() {
            let result = {
                let mut client = self.client.lock().await;
                client.subscribe(topic, self.subscribe_qos).await
            };
            match result {
                Ok(packet_id) => debug!("Subscribe {} requested (packet {})", topic, packet_id),
                Err(e) => warn!("Subscribe {} failed: {:?}", topic, Dbg(&e)),
            }
        }
    }

    async fn unsubscribe_all(&mut self) {
        for topic in self.topics.iter() {
            let result = {
                let mut client = self.client.lock().await;
                client.unsubscribe(topic).await
            };
            if let Err(e) = result {
                warn!("Unsubscribe {} failed: {:?}", topic, Dbg(&e));
            }
        }
        info!("Unsubscribed topics");
    }

    /// Logs request completions. Failures are not retried.
    pub fn handle_ack(&self, event: &MqttEvent) {
        match *event {
            MqttEvent::Subscribed { packet_id, ok } => {
                info!("Subscribe {} complete, ok = {}", packet_id, ok)
            }
            MqttEvent::Unsubscribed { packet_id, ok } => {
                info!("Unsubscribe {} complete, ok = {}", packet_id, ok)
            }
            MqttEvent::Published { packet_id, ok } => {
                if !ok {
                    warn!("Publish {} was not acknowledged", packet_id);
                }
            }
            _ => {}
        }
    }

    /// Publishes through the client. Refused while the session is not connected.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<Option<u16>, SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        let mut client = self.client.lock().await;
        client.publish(topic, payload, qos, retain).await.map_err(|e| {
            warn!("Publish to {} failed: {:?}", topic, Dbg(&e));
            SessionError::Request
        })
    }

    /// Lets the client do its pending transport work and collects the events.
    pub async fn process(&mut self, events: &mut EventQueue) -> Result<(), SessionError> {
        let mut client = self.client.lock().await;
        client.process(events).await.map_err(|e| {
            warn!("MQTT processing failed: {:?}", Dbg(&e));
            SessionError::Request
        })
    }

    /// Unsubscribes every topic and disconnects.
    pub async fn shutdown(&mut self) {
        if self.state == SessionState::Connected {
            self.unsubscribe_all().await;
        }
        let result = {
            let mut client = self.client.lock().await;
            client.disconnect().await
        };
        if let Err(e) = result {
            warn!("MQTT disconnect failed: {:?}", Dbg(&e));
        }
        self.state = SessionState::Disconnected;
    }
}
