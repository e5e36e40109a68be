//! # MQTT Client
//!
//! [`MessagingClient`] is the capability the session supervisor drives: connect,
//! subscribe, unsubscribe, publish, disconnect, and a `process` step that
//! delivers everything the broker sent since the last call as [`MqttEvent`]s.
//!
//! [`MqttClient`] implements it for MQTT 3.1.1 over any [`MqttTransport`].
//! Requests never wait for their acknowledgement: the packet is written, the
//! packet identifier is returned, and the matching CONNACK / SUBACK / UNSUBACK /
//! PUBACK shows up later as an event from `process`.

use core::net::SocketAddrV4;

use embassy_time::{Duration, Instant};
use heapless::{Deque, String, Vec};

use crate::error::{ConnectReasonCode, MqttError, ProtocolError};
use crate::packet::{
    self, Connect, Disconnect, EncodePacket, MqttPacket, PingReq, PubAck, Publish, QoS, Subscribe,
    Unsubscribe,
};
use crate::runtime::MAX_TOPIC_LEN;
use crate::time::{Clock, SystemClock};
use crate::transport::{MqttTransport, TransportError};
use crate::util;

/// Largest inbound payload delivered to the application.
pub const MAX_PAYLOAD_LEN: usize = 256;

/// Number of events a single `process` call can hand back.
pub const EVENT_QUEUE_DEPTH: usize = 16;

/// Queue slots that only a status event may take, so losing the link is
/// always reported.
const STATUS_RESERVE: usize = 1;

/// Requests awaiting an acknowledgement.
const MAX_PENDING: usize = 16;

/// Events drained from the client by the event loop, in arrival order.
pub type EventQueue = Deque<MqttEvent, EVENT_QUEUE_DEPTH>;

/// Outcome of a connect attempt or the loss of an established session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionStatus {
    /// The broker accepted the session.
    Accepted,
    /// The broker answered CONNACK with a non-zero return code.
    Refused(ConnectReasonCode),
    /// The transport was closed or failed.
    Disconnected,
    /// No CONNACK arrived in time, or the broker stopped answering pings.
    Timeout,
}

impl ConnectionStatus {
    /// Numeric status, numbered the way lwIP's MQTT client reports it.
    pub fn code(self) -> u16 {
        match self {
            Self::Accepted => 0,
            Self::Refused(reason) => reason.code() as u16,
            Self::Disconnected => 256,
            Self::Timeout => 257,
        }
    }

    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// An application message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String<MAX_TOPIC_LEN>,
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
}

impl InboundMessage {
    /// Copies a message out of the receive buffer.
    ///
    /// Returns `None` when the topic or the payload does not fit.
    pub fn new(topic: &str, payload: &[u8]) -> Option<Self> {
        let mut owned_topic = String::new();
        owned_topic.push_str(topic).ok()?;
        let owned_payload = Vec::from_slice(payload).ok()?;
        Some(Self {
            topic: owned_topic,
            payload: owned_payload,
        })
    }

    /// The payload as text, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.payload).ok()
    }
}

/// Everything the client reports back to the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttEvent {
    Status(ConnectionStatus),
    Subscribed { packet_id: u16, ok: bool },
    Unsubscribed { packet_id: u16, ok: bool },
    Published { packet_id: u16, ok: bool },
    Message(InboundMessage),
}

/// Username and password sent in CONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub username: &'static str,
    pub password: &'static str,
}

/// Connection parameters, fixed for the lifetime of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MqttOptions {
    pub client_id: &'static str,
    pub credentials: Option<Credentials>,
    /// Keep-alive interval in seconds, `0` disables PINGREQ.
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    /// How long to wait for CONNACK before reporting [`ConnectionStatus::Timeout`].
    pub connect_timeout: Duration,
    /// How long a SUBSCRIBE / UNSUBSCRIBE / QoS 1 PUBLISH may stay unacknowledged.
    pub request_timeout: Duration,
}

impl MqttOptions {
    pub const fn new(client_id: &'static str) -> Self {
        Self {
            client_id,
            credentials: None,
            keep_alive_secs: 0,
            clean_session: true,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub const fn with_credentials(mut self, username: &'static str, password: &'static str) -> Self {
        self.credentials = Some(Credentials { username, password });
        self
    }

    pub const fn with_keep_alive(mut self, secs: u16) -> Self {
        self.keep_alive_secs = secs;
        self
    }

    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// The messaging capability used by the session supervisor.
#[allow(async_fn_in_trait)]
pub trait MessagingClient {
    type Error: core::fmt::Debug;

    /// Starts a connect attempt. The result arrives later as a status event.
    async fn connect(&mut self, broker: SocketAddrV4, options: &MqttOptions)
    -> Result<(), Self::Error>;

    /// Sends SUBSCRIBE and returns its packet identifier.
    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<u16, Self::Error>;

    /// Sends UNSUBSCRIBE and returns its packet identifier.
    async fn unsubscribe(&mut self, topic: &str) -> Result<u16, Self::Error>;

    /// Sends PUBLISH. Returns the packet identifier for acknowledged QoS levels.
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<Option<u16>, Self::Error>;

    /// Ends the session and closes the transport. No status event follows.
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Performs pending transport work and appends the resulting events.
    async fn process(&mut self, events: &mut EventQueue) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Closed,
    AwaitingConnAck { since: Instant },
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Subscribe,
    Unsubscribe,
    Publish,
}

impl RequestKind {
    fn completion(self, packet_id: u16, ok: bool) -> MqttEvent {
        match self {
            Self::Subscribe => MqttEvent::Subscribed { packet_id, ok },
            Self::Unsubscribe => MqttEvent::Unsubscribed { packet_id, ok },
            Self::Publish => MqttEvent::Published { packet_id, ok },
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    packet_id: u16,
    kind: RequestKind,
    sent_at: Instant,
}

/// A decoded packet that no longer borrows the receive buffer.
enum Incoming {
    ConnAck(u8),
    Publish {
        message: Option<InboundMessage>,
        ack: Option<u16>,
    },
    Ack { packet_id: u16, ok: bool },
    PingResp,
}

/// MQTT 3.1.1 client over a byte-stream transport.
///
/// `BUF` sizes both the transmit and the receive buffer, so it bounds the
/// largest packet that can be sent or received.
pub struct MqttClient<T, const BUF: usize, K = SystemClock>
where
    T: MqttTransport,
    K: Clock,
{
    transport: T,
    clock: K,
    tx_buf: [u8; BUF],
    rx_buf: [u8; BUF],
    rx_len: usize,
    link: Link,
    link_lost: bool,
    pending: Vec<PendingRequest, MAX_PENDING>,
    next_packet_id: u16,
    keep_alive: Duration,
    connect_timeout: Duration,
    request_timeout: Duration,
    last_tx: Instant,
    ping_sent_at: Option<Instant>,
}

impl<T, const BUF: usize> MqttClient<T, BUF, SystemClock>
where
    T: MqttTransport,
{
    pub fn new(transport: T) -> Self {
        Self::with_clock(transport, SystemClock)
    }
}

impl<T, const BUF: usize, K> MqttClient<T, BUF, K>
where
    T: MqttTransport,
    K: Clock,
{
    pub fn with_clock(transport: T, clock: K) -> Self {
        let defaults = MqttOptions::new("");
        Self {
            transport,
            clock,
            tx_buf: [0; BUF],
            rx_buf: [0; BUF],
            rx_len: 0,
            link: Link::Closed,
            link_lost: false,
            pending: Vec::new(),
            next_packet_id: 1,
            keep_alive: Duration::from_secs(0),
            connect_timeout: defaults.connect_timeout,
            request_timeout: defaults.request_timeout,
            last_tx: Instant::from_ticks(0),
            ping_sent_at: None,
        }
    }

    /// `true` once CONNACK accepted the session and until it is lost.
    pub fn is_connected(&self) -> bool {
        self.link == Link::Open
    }

    /// Access to the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn next_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        // Packet identifier 0 is reserved.
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }

    fn ensure_open(&self) -> Result<(), MqttError<T::Error>> {
        if self.link == Link::Open && !self.link_lost {
            Ok(())
        } else {
            Err(MqttError::NotConnected)
        }
    }

    async fn send_packet<P: EncodePacket>(&mut self, packet: &P) -> Result<(), MqttError<T::Error>> {
        let len = packet.encode(&mut self.tx_buf).map_err(|e| e.lift())?;
        trace!("TX {} bytes", len);
        if let Err(e) = self.transport.send(&self.tx_buf[..len]).await {
            if self.link != Link::Closed {
                self.link_lost = true;
            }
            return Err(MqttError::Transport(e));
        }
        self.last_tx = self.clock.now();
        Ok(())
    }

    fn track(&mut self, packet_id: u16, kind: RequestKind) {
        let request = PendingRequest {
            packet_id,
            kind,
            sent_at: self.clock.now(),
        };
        if self.pending.push(request).is_err() {
            warn!("Too many requests in flight, packet {} is not tracked", packet_id);
        }
    }

    fn complete(&mut self, packet_id: u16) -> Option<RequestKind> {
        let index = self.pending.iter().position(|p| p.packet_id == packet_id)?;
        Some(self.pending.swap_remove(index).kind)
    }

    /// Whether a non-status event can still be queued.
    fn has_room(events: &EventQueue) -> bool {
        events.len() < EVENT_QUEUE_DEPTH - STATUS_RESERVE
    }

    fn emit(events: &mut EventQueue, event: MqttEvent) -> bool {
        if !Self::has_room(events) {
            warn!("MQTT event queue full, dropping event");
            return false;
        }
        events.push_back(event).is_ok()
    }

    fn emit_status(events: &mut EventQueue, status: ConnectionStatus) {
        if events.push_back(MqttEvent::Status(status)).is_err() {
            error!("MQTT event queue not drained, status {} lost", status.code());
        }
    }

    /// Closes the transport, fails every outstanding request and reports `status`.
    fn drop_link(&mut self, events: &mut EventQueue, status: ConnectionStatus) {
        self.transport.close();
        self.link = Link::Closed;
        self.link_lost = false;
        self.rx_len = 0;
        self.ping_sent_at = None;
        let mut dropped = 0;
        for request in self.pending.iter() {
            if !Self::emit(events, request.kind.completion(request.packet_id, false)) {
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!("{} failed requests not reported", dropped);
        }
        self.pending.clear();
        Self::emit_status(events, status);
    }

    /// Decodes the frame at the start of the receive buffer.
    fn decode_frame(&self, len: usize) -> Result<Incoming, MqttError<T::Error>> {
        let packet = packet::decode(&self.rx_buf[..len]).map_err(|e| e.lift())?;
        let incoming = match packet {
            MqttPacket::ConnAck(ack) => Incoming::ConnAck(ack.return_code),
            MqttPacket::Publish(publish) => {
                let message = InboundMessage::new(publish.topic, publish.payload);
                if message.is_none() {
                    warn!(
                        "Dropping message on {}: {} byte payload does not fit",
                        publish.topic,
                        publish.payload.len()
                    );
                }
                let ack = match publish.qos {
                    QoS::AtLeastOnce => publish.packet_id,
                    _ => None,
                };
                Incoming::Publish { message, ack }
            }
            MqttPacket::PubAck(ack) => Incoming::Ack {
                packet_id: ack.packet_id,
                ok: true,
            },
            MqttPacket::SubAck(ack) => Incoming::Ack {
                packet_id: ack.packet_id,
                ok: ack.is_success(),
            },
            MqttPacket::UnsubAck(ack) => Incoming::Ack {
                packet_id: ack.packet_id,
                ok: true,
            },
            MqttPacket::PingResp => Incoming::PingResp,
        };
        Ok(incoming)
    }

    async fn handle_incoming(&mut self, incoming: Incoming, events: &mut EventQueue) {
        match incoming {
            Incoming::ConnAck(code) => {
                if !matches!(self.link, Link::AwaitingConnAck { .. }) {
                    warn!("Unexpected CONNACK ignored");
                    return;
                }
                match ConnectReasonCode::from(code) {
                    ConnectReasonCode::Success => {
                        debug!("CONNACK accepted");
                        self.link = Link::Open;
                        Self::emit_status(events, ConnectionStatus::Accepted);
                    }
                    reason => {
                        self.drop_link(events, ConnectionStatus::Refused(reason));
                    }
                }
            }
            Incoming::Publish { message, ack } => {
                if let Some(packet_id) = ack
                    && let Err(e) = self.send_packet(&PubAck { packet_id }).await
                {
                    warn!("Failed to send PUBACK: {:?}", crate::fmt::Dbg(&e));
                }
                if let Some(message) = message {
                    Self::emit(events, MqttEvent::Message(message));
                }
            }
            Incoming::Ack { packet_id, ok } => match self.complete(packet_id) {
                Some(kind) => {
                    Self::emit(events, kind.completion(packet_id, ok));
                }
                None => debug!("Acknowledgement for unknown packet {}", packet_id),
            },
            Incoming::PingResp => {
                self.ping_sent_at = None;
            }
        }
    }

    /// Expires the connect attempt, stale requests and unanswered pings.
    async fn check_timers(&mut self, events: &mut EventQueue) {
        let now = self.clock.now();
        match self.link {
            Link::Closed => {}
            Link::AwaitingConnAck { since } => {
                if now.saturating_duration_since(since) >= self.connect_timeout {
                    warn!("No CONNACK within {} ms", self.connect_timeout.as_millis());
                    self.drop_link(events, ConnectionStatus::Timeout);
                }
            }
            Link::Open => {
                let timeout = self.request_timeout;
                let mut i = 0;
                // Expiries that do not fit wait for the next call.
                while i < self.pending.len() && Self::has_room(events) {
                    let request = self.pending[i];
                    if now.saturating_duration_since(request.sent_at) >= timeout {
                        warn!("Packet {} was never acknowledged", request.packet_id);
                        self.pending.swap_remove(i);
                        Self::emit(events, request.kind.completion(request.packet_id, false));
                    } else {
                        i += 1;
                    }
                }

                if self.keep_alive.as_ticks() == 0 {
                    return;
                }
                match self.ping_sent_at {
                    Some(sent) if now.saturating_duration_since(sent) >= self.keep_alive => {
                        warn!("Broker stopped answering PINGREQ");
                        self.drop_link(events, ConnectionStatus::Timeout);
                    }
                    Some(_) => {}
                    None => {
                        if now.saturating_duration_since(self.last_tx) >= self.keep_alive {
                            trace!("Sending PINGREQ");
                            if self.send_packet(&PingReq).await.is_ok() {
                                self.ping_sent_at = Some(now);
                            }
                        }
                    }
                }
            }
        }
    }
}

impl<T, const BUF: usize, K> MessagingClient for MqttClient<T, BUF, K>
where
    T: MqttTransport,
    K: Clock,
{
    type Error = MqttError<T::Error>;

    async fn connect(
        &mut self,
        broker: SocketAddrV4,
        options: &MqttOptions,
    ) -> Result<(), Self::Error> {
        if self.link != Link::Closed {
            self.transport.close();
        }
        self.link = Link::Closed;
        self.link_lost = false;
        self.rx_len = 0;
        self.pending.clear();
        self.ping_sent_at = None;
        self.keep_alive = Duration::from_secs(options.keep_alive_secs as u64);
        self.connect_timeout = options.connect_timeout;
        self.request_timeout = options.request_timeout;

        info!("Connecting to MQTT broker {:?}", crate::fmt::Dbg(&broker));
        self.transport.open(broker).await?;

        let mut connect = Connect::new(options.client_id, options.keep_alive_secs, options.clean_session);
        if let Some(credentials) = options.credentials {
            connect = connect.with_credentials(credentials.username, credentials.password);
        }
        if let Err(e) = self.send_packet(&connect).await {
            self.transport.close();
            return Err(e);
        }
        self.link = Link::AwaitingConnAck {
            since: self.clock.now(),
        };
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<u16, Self::Error> {
        self.ensure_open()?;
        let packet_id = self.next_packet_id();
        self.send_packet(&Subscribe::new(packet_id, topic, qos)).await?;
        self.track(packet_id, RequestKind::Subscribe);
        Ok(packet_id)
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<u16, Self::Error> {
        self.ensure_open()?;
        let packet_id = self.next_packet_id();
        self.send_packet(&Unsubscribe { packet_id, topic }).await?;
        self.track(packet_id, RequestKind::Unsubscribe);
        Ok(packet_id)
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<Option<u16>, Self::Error> {
        self.ensure_open()?;
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => Some(self.next_packet_id()),
            QoS::ExactlyOnce => return Err(MqttError::Protocol(ProtocolError::UnsupportedQoS)),
        };
        let packet = Publish {
            topic,
            qos,
            retain,
            payload,
            packet_id,
        };
        self.send_packet(&packet).await?;
        if let Some(id) = packet_id {
            self.track(id, RequestKind::Publish);
        }
        Ok(packet_id)
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        let result = if self.link == Link::Closed {
            Ok(())
        } else {
            self.send_packet(&Disconnect).await
        };
        self.transport.close();
        self.link = Link::Closed;
        self.link_lost = false;
        self.rx_len = 0;
        self.pending.clear();
        self.ping_sent_at = None;
        result
    }

    async fn process(&mut self, events: &mut EventQueue) -> Result<(), Self::Error> {
        if self.link == Link::Closed {
            return Ok(());
        }
        if self.link_lost {
            self.drop_link(events, ConnectionStatus::Disconnected);
            return Ok(());
        }

        // Frames left over from a call that filled the queue are handled
        // before reading more.
        let buffered = matches!(util::frame_len(&self.rx_buf[..self.rx_len]), Ok(Some(_)));
        if !buffered {
            if self.rx_len == BUF {
                warn!("Inbound packet larger than the {} byte buffer", BUF);
                self.drop_link(events, ConnectionStatus::Disconnected);
                return Ok(());
            }

            match self.transport.recv(&mut self.rx_buf[self.rx_len..]).await {
                Ok(0) => {
                    info!("Broker closed the connection");
                    self.drop_link(events, ConnectionStatus::Disconnected);
                    return Ok(());
                }
                Ok(n) => self.rx_len += n,
                Err(e) if e.is_timeout() => {}
                Err(e) => {
                    warn!("Transport failed: {:?}", crate::fmt::Dbg(&e));
                    self.drop_link(events, ConnectionStatus::Disconnected);
                    return Ok(());
                }
            }
        }

        loop {
            if !Self::has_room(events) {
                debug!("Event queue full, {} bytes left buffered", self.rx_len);
                break;
            }
            let len = match util::frame_len(&self.rx_buf[..self.rx_len]) {
                Ok(Some(len)) => len,
                Ok(None) => break,
                Err(e) => {
                    warn!("Malformed frame from broker: {:?}", crate::fmt::Dbg(&e));
                    self.drop_link(events, ConnectionStatus::Disconnected);
                    return Ok(());
                }
            };
            let incoming = self.decode_frame(len);
            self.rx_buf.copy_within(len..self.rx_len, 0);
            self.rx_len -= len;
            match incoming {
                Ok(incoming) => self.handle_incoming(incoming, events).await,
                Err(e) => warn!("Ignoring undecodable packet: {:?}", crate::fmt::Dbg(&e)),
            }
            if self.link == Link::Closed {
                return Ok(());
            }
        }

        self.check_timers(events).await;
        Ok(())
    }
}
