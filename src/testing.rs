//! Scripted stand-ins for the node's collaborators, used by the unit tests.

use core::cell::Cell;
use core::convert::Infallible;
use core::net::{Ipv4Addr, SocketAddrV4};
use std::collections::VecDeque;
use std::string::String;
use std::vec::Vec;

use embassy_time::{Duration, Instant};
use embedded_hal::digital::{ErrorType, OutputPin};
use embedded_hal_async::delay::DelayNs;

use crate::client::{EventQueue, MessagingClient, MqttEvent, MqttOptions};
use crate::config::WifiCredentials;
use crate::error::{AssociationTimeout, RadioFault};
use crate::network::WifiRadio;
use crate::packet::QoS;
use crate::telemetry::LightSensor;
use crate::time::Clock;
use crate::transport::{MqttTransport, TransportError};

/// A clock that only moves when told to.
pub struct ManualClock {
    ticks: Cell<u64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { ticks: Cell::new(0) }
    }

    pub fn advance(&self, by: Duration) {
        self.ticks.set(self.ticks.get() + by.as_ticks());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        Instant::from_ticks(self.ticks.get())
    }
}

/// Records every requested sleep and returns immediately.
#[derive(Default)]
pub struct RecordingDelay {
    pub sleeps: Vec<Duration>,
}

impl RecordingDelay {
    pub fn total_ms(&self) -> u64 {
        self.sleeps.iter().map(|d| d.as_millis()).sum()
    }
}

impl DelayNs for RecordingDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.sleeps.push(Duration::from_nanos(ns as u64));
    }

    async fn delay_us(&mut self, us: u32) {
        self.sleeps.push(Duration::from_micros(us as u64));
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.sleeps.push(Duration::from_millis(ms as u64));
    }
}

/// Returns the scripted readings in order, then repeats the last one.
pub struct MockSensor {
    readings: VecDeque<u16>,
    last: u16,
    pub reads: usize,
}

impl MockSensor {
    pub fn new(readings: &[u16]) -> Self {
        Self {
            readings: readings.iter().copied().collect(),
            last: 0,
            reads: 0,
        }
    }
}

impl LightSensor for MockSensor {
    fn read(&mut self) -> u16 {
        self.reads += 1;
        if let Some(value) = self.readings.pop_front() {
            self.last = value;
        }
        self.last
    }
}

#[derive(Default)]
pub struct MockPin {
    /// `Some(true)` when driven high.
    pub state: Option<bool>,
    pub writes: usize,
}

impl ErrorType for MockPin {
    type Error = Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.state = Some(false);
        self.writes += 1;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.state = Some(true);
        self.writes += 1;
        Ok(())
    }
}

/// A radio that times out a fixed number of times before associating.
pub struct MockRadio {
    init: Result<(), RadioFault>,
    timeouts: usize,
    ip: Ipv4Addr,
    pub attempts: usize,
    pub last_timeout: Option<Duration>,
}

impl MockRadio {
    pub fn new(init: Result<(), RadioFault>, timeouts: usize, ip: Ipv4Addr) -> Self {
        Self {
            init,
            timeouts,
            ip,
            attempts: 0,
            last_timeout: None,
        }
    }
}

impl WifiRadio for MockRadio {
    async fn init(&mut self) -> Result<(), RadioFault> {
        self.init
    }

    async fn associate(
        &mut self,
        _credentials: &WifiCredentials,
        timeout: Duration,
    ) -> Result<Ipv4Addr, AssociationTimeout> {
        self.attempts += 1;
        self.last_timeout = Some(timeout);
        if self.timeouts > 0 {
            self.timeouts -= 1;
            Err(AssociationTimeout)
        } else {
            Ok(self.ip)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockTransportError {
    Timeout,
    Refused,
    Reset,
}

impl TransportError for MockTransportError {
    fn is_timeout(&self) -> bool {
        matches!(self, MockTransportError::Timeout)
    }
}

/// A byte stream fed from scripted reads. An empty script reads as a timeout.
#[derive(Default)]
pub struct MockTransport {
    incoming: VecDeque<Result<Vec<u8>, MockTransportError>>,
    pub sent: Vec<Vec<u8>>,
    pub opened: Option<SocketAddrV4>,
    pub closed: usize,
    pub refuse_open: bool,
}

impl MockTransport {
    pub fn push_incoming(&mut self, bytes: &[u8]) {
        self.incoming.push_back(Ok(bytes.to_vec()));
    }

    pub fn push_result(&mut self, result: Result<Vec<u8>, MockTransportError>) {
        self.incoming.push_back(result);
    }
}

impl MqttTransport for MockTransport {
    type Error = MockTransportError;

    async fn open(&mut self, remote: SocketAddrV4) -> Result<(), Self::Error> {
        if self.refuse_open {
            return Err(MockTransportError::Refused);
        }
        self.opened = Some(remote);
        Ok(())
    }

    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        self.sent.push(buf.to_vec());
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match self.incoming.pop_front() {
            None => Err(MockTransportError::Timeout),
            Some(Err(e)) => Err(e),
            Some(Ok(mut chunk)) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.incoming.push_front(Ok(chunk.split_off(n)));
                }
                Ok(n)
            }
        }
    }

    fn close(&mut self) {
        self.closed += 1;
    }
}

/// A request made to [`MockClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(SocketAddrV4),
    Subscribe(String, QoS),
    Unsubscribe(String),
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    },
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockClientError;

/// Records every request and hands out scripted event batches, one per `process`.
#[derive(Default)]
pub struct MockClient {
    pub calls: Vec<Call>,
    batches: VecDeque<Vec<MqttEvent>>,
    /// Number of upcoming connects that fail to start.
    pub connect_failures: usize,
    next_packet_id: u16,
}

impl MockClient {
    /// Queues the events returned by one future `process` call.
    pub fn script(&mut self, events: impl IntoIterator<Item = MqttEvent>) {
        self.batches.push_back(events.into_iter().collect());
    }

    pub fn connects(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, Call::Connect(_)))
            .count()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Subscribe(topic, _) => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    /// `(topic, payload text)` of every publish.
    pub fn publishes(&self) -> Vec<(String, String)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Publish { topic, payload, .. } => {
                    Some((topic.clone(), String::from_utf8_lossy(payload).into_owned()))
                }
                _ => None,
            })
            .collect()
    }

    fn packet_id(&mut self) -> u16 {
        self.next_packet_id += 1;
        self.next_packet_id
    }
}

impl MessagingClient for MockClient {
    type Error = MockClientError;

    async fn connect(
        &mut self,
        broker: SocketAddrV4,
        _options: &MqttOptions,
    ) -> Result<(), Self::Error> {
        self.calls.push(Call::Connect(broker));
        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            return Err(MockClientError);
        }
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<u16, Self::Error> {
        self.calls.push(Call::Subscribe(topic.into(), qos));
        Ok(self.packet_id())
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<u16, Self::Error> {
        self.calls.push(Call::Unsubscribe(topic.into()));
        Ok(self.packet_id())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<Option<u16>, Self::Error> {
        self.calls.push(Call::Publish {
            topic: topic.into(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        Ok(match qos {
            QoS::AtMostOnce => None,
            _ => Some(self.packet_id()),
        })
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.calls.push(Call::Disconnect);
        Ok(())
    }

    async fn process(&mut self, events: &mut EventQueue) -> Result<(), Self::Error> {
        for event in self.batches.pop_front().unwrap_or_default() {
            events
                .push_back(event)
                .map_err(|_| MockClientError)?;
        }
        Ok(())
    }
}
