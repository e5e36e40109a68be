//! Outbox that buffers module publishes until the runtime can send them.

use heapless::{String, Vec};

use super::traits::PublishOutbox;
use crate::QoS;

/// A buffered outbox that collects publish requests during module callbacks.
///
/// The runtime hands it to `on_tick`, then sends every buffered request
/// through the session and clears it.
///
/// # Type Parameters
///
/// - `CAPACITY`: Maximum number of publish requests that can be buffered
/// - `TOPIC_SIZE`: Maximum topic string length
/// - `PAYLOAD_SIZE`: Maximum payload size
pub struct BufferedOutbox<const CAPACITY: usize, const TOPIC_SIZE: usize, const PAYLOAD_SIZE: usize>
{
    requests: Vec<OwnedPublishRequest<TOPIC_SIZE, PAYLOAD_SIZE>, CAPACITY>,
}

/// A publish request with inline storage for topic and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedPublishRequest<const TOPIC_SIZE: usize, const PAYLOAD_SIZE: usize> {
    pub topic: String<TOPIC_SIZE>,
    pub payload: Vec<u8, PAYLOAD_SIZE>,
    pub qos: QoS,
    pub retain: bool,
}

impl<const CAPACITY: usize, const TOPIC_SIZE: usize, const PAYLOAD_SIZE: usize>
    BufferedOutbox<CAPACITY, TOPIC_SIZE, PAYLOAD_SIZE>
{
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
        }
    }

    /// Buffered requests in the order they were queued.
    pub fn iter(&self) -> impl Iterator<Item = &OwnedPublishRequest<TOPIC_SIZE, PAYLOAD_SIZE>> {
        self.requests.iter()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }
}

impl<const CAPACITY: usize, const TOPIC_SIZE: usize, const PAYLOAD_SIZE: usize> Default
    for BufferedOutbox<CAPACITY, TOPIC_SIZE, PAYLOAD_SIZE>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAPACITY: usize, const TOPIC_SIZE: usize, const PAYLOAD_SIZE: usize> PublishOutbox
    for BufferedOutbox<CAPACITY, TOPIC_SIZE, PAYLOAD_SIZE>
{
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) {
        let mut owned_topic = String::new();
        if owned_topic.push_str(topic).is_err() {
            warn!("Outbox: topic {} too long, dropped", topic);
            return;
        }

        let Ok(owned_payload) = Vec::from_slice(payload) else {
            warn!("Outbox: {} byte payload too large, dropped", payload.len());
            return;
        };

        let request = OwnedPublishRequest {
            topic: owned_topic,
            payload: owned_payload,
            qos,
            retain,
        };
        if self.requests.push(request).is_err() {
            warn!("Outbox full, publish to {} dropped", topic);
        }
    }
}
