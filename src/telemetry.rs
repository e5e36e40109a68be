//! Telemetry publisher.
//!
//! Samples the light sensor once per interval and publishes the reading as
//! decimal text, skipping readings equal to the last one published.

use core::fmt::Write;

use embassy_time::Instant;
use heapless::String;

use crate::client::InboundMessage;
use crate::config::{NodeConfig, TelemetrySettings};
use crate::runtime::{MqttModule, PublishOutbox, TopicCollector};

/// The analog light sensor.
pub trait LightSensor {
    /// Current light level.
    fn read(&mut self) -> u16;
}

/// Decimal text of a reading, at most five digits.
pub fn encode_reading(value: u16) -> String<5> {
    let mut text = String::new();
    // u16::MAX has five digits, so this cannot overflow the buffer.
    let _ = write!(text, "{}", value);
    text
}

pub struct TelemetryPublisher<S> {
    sensor: S,
    topic: &'static str,
    settings: TelemetrySettings,
    last_published: Option<u16>,
    next_deadline: Instant,
}

impl<S: LightSensor> TelemetryPublisher<S> {
    /// The first reading is taken one interval after `start`.
    pub fn new(sensor: S, config: &NodeConfig, start: Instant) -> Self {
        Self {
            sensor,
            topic: config.topics.telemetry,
            settings: config.telemetry,
            last_published: None,
            next_deadline: start + config.telemetry.interval,
        }
    }

    pub fn last_published(&self) -> Option<u16> {
        self.last_published
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    /// Samples and publishes if the deadline has been reached.
    ///
    /// Returns the reading that was handed to `outbox`, if any.
    pub fn tick(&mut self, now: Instant, outbox: &mut dyn PublishOutbox) -> Option<u16> {
        if now < self.next_deadline {
            return None;
        }
        self.next_deadline = now + self.settings.interval;

        let value = self.sensor.read();
        if self.last_published == Some(value) {
            trace!("Light level unchanged at {}", value);
            return None;
        }
        self.last_published = Some(value);

        let text = encode_reading(value);
        info!("Publishing {} -> {}", text.as_str(), self.topic);
        outbox.publish(
            self.topic,
            text.as_bytes(),
            self.settings.qos,
            self.settings.retain,
        );
        Some(value)
    }
}

impl<S: LightSensor> MqttModule for TelemetryPublisher<S> {
    fn register(&self, _collector: &mut dyn TopicCollector) {}

    fn on_message(&mut self, _msg: &InboundMessage) {}

    fn on_tick(&mut self, now: Instant, outbox: &mut dyn PublishOutbox) {
        self.tick(now, outbox);
    }
}
