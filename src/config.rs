//! Node configuration.
//!
//! Defaults are compile-time constants. WiFi credentials and the broker address
//! are taken from the build environment (`WIFI_SSID`, `WIFI_PASSWORD`,
//! `MQTT_BROKER_ADDR`) when set, so firmware images do not carry them in source.

use embassy_time::Duration;

use crate::backoff::BackoffPolicy;
use crate::client::MqttOptions;
use crate::packet::QoS;

pub const MQTT_BROKER_PORT: u16 = 1883;
pub const MQTT_CLIENT_ID: &str = "pico_client";

pub const TOPIC_LIGHT_CONTROL: &str = "/light";
pub const TOPIC_LIGHT_SENSOR: &str = "/light_sensor";
pub const TOPIC_PRINT: &str = "/print";
pub const TOPIC_PING: &str = "/ping";
pub const TOPIC_EXIT: &str = "/exit";

pub const LIGHT_PUBLISH_INTERVAL: Duration = Duration::from_millis(3000);
pub const MQTT_SUBSCRIBE_QOS: QoS = QoS::AtLeastOnce;
pub const MQTT_PUBLISH_QOS: QoS = QoS::AtLeastOnce;
pub const MQTT_PUBLISH_RETAIN: bool = false;

pub const WIFI_ASSOCIATION_TIMEOUT: Duration = Duration::from_secs(10);
pub const WIFI_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Sleep at the end of every event loop iteration.
pub const LOOP_PERIOD: Duration = Duration::from_millis(10);

pub const WIFI_SSID: &str = match option_env!("WIFI_SSID") {
    Some(ssid) => ssid,
    None => "",
};

pub const WIFI_PASSWORD: &str = match option_env!("WIFI_PASSWORD") {
    Some(password) => password,
    None => "",
};

pub const MQTT_BROKER_ADDR: &str = match option_env!("MQTT_BROKER_ADDR") {
    Some(addr) => addr,
    None => "192.168.4.1",
};

/// Topics the node subscribes to and publishes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicSet {
    /// Actuator commands.
    pub control: &'static str,
    /// Sensor readings.
    pub telemetry: &'static str,
    /// `/print`, `/ping` and `/exit`, subscribed only when enabled.
    pub diagnostics: Option<DiagnosticTopics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticTopics {
    pub print: &'static str,
    pub ping: &'static str,
    pub exit: &'static str,
}

impl TopicSet {
    /// Control, telemetry and the diagnostic topics.
    pub const fn full() -> Self {
        Self {
            control: TOPIC_LIGHT_CONTROL,
            telemetry: TOPIC_LIGHT_SENSOR,
            diagnostics: Some(DiagnosticTopics {
                print: TOPIC_PRINT,
                ping: TOPIC_PING,
                exit: TOPIC_EXIT,
            }),
        }
    }

    /// Only the control and telemetry topics.
    pub const fn control_only() -> Self {
        Self {
            diagnostics: None,
            ..Self::full()
        }
    }

    /// Every topic the node subscribes to, control first.
    pub fn subscriptions(&self) -> impl Iterator<Item = &'static str> + '_ {
        let diagnostics = self
            .diagnostics
            .iter()
            .flat_map(|d| [d.print, d.ping, d.exit]);
        core::iter::once(self.control).chain(diagnostics)
    }
}

impl Default for TopicSet {
    fn default() -> Self {
        Self::full()
    }
}

/// WiFi authentication scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AuthMode {
    Open,
    Wpa2PskAes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: &'static str,
    pub passphrase: &'static str,
    pub auth: AuthMode,
}

impl WifiCredentials {
    pub const fn new(ssid: &'static str, passphrase: &'static str) -> Self {
        Self {
            ssid,
            passphrase,
            auth: AuthMode::Wpa2PskAes,
        }
    }
}

impl Default for WifiCredentials {
    fn default() -> Self {
        Self::new(WIFI_SSID, WIFI_PASSWORD)
    }
}

/// Where and how to reach the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    /// IPv4 literal, parsed once by the session.
    pub address: &'static str,
    pub port: u16,
    pub options: MqttOptions,
    pub subscribe_qos: QoS,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: MQTT_BROKER_ADDR,
            port: MQTT_BROKER_PORT,
            options: MqttOptions::new(MQTT_CLIENT_ID),
            subscribe_qos: MQTT_SUBSCRIBE_QOS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetrySettings {
    pub interval: Duration,
    pub qos: QoS,
    pub retain: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            interval: LIGHT_PUBLISH_INTERVAL,
            qos: MQTT_PUBLISH_QOS,
            retain: MQTT_PUBLISH_RETAIN,
        }
    }
}

/// Everything the runtime needs, with builder-style setters.
///
/// ```ignore
/// let config = NodeConfig::default()
///     .with_broker_address("10.0.0.2")
///     .with_topics(TopicSet::control_only());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeConfig {
    pub wifi: WifiCredentials,
    pub association_timeout: Duration,
    pub association_retry_delay: Duration,
    pub broker: BrokerConfig,
    pub topics: TopicSet,
    pub telemetry: TelemetrySettings,
    pub reconnect: BackoffPolicy,
    pub loop_period: Duration,
    /// Stop the event loop when a message arrives on the exit topic.
    pub shutdown_on_exit: bool,
    /// Accept LED commands on the control topic alone. When unset, a command
    /// payload on any subscribed topic drives the LED.
    pub control_topic_only: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            wifi: WifiCredentials::default(),
            association_timeout: WIFI_ASSOCIATION_TIMEOUT,
            association_retry_delay: WIFI_RETRY_DELAY,
            broker: BrokerConfig::default(),
            topics: TopicSet::default(),
            telemetry: TelemetrySettings::default(),
            reconnect: BackoffPolicy::default(),
            loop_period: LOOP_PERIOD,
            shutdown_on_exit: true,
            control_topic_only: false,
        }
    }
}

impl NodeConfig {
    pub fn with_wifi(mut self, wifi: WifiCredentials) -> Self {
        self.wifi = wifi;
        self
    }

    pub fn with_broker_address(mut self, address: &'static str) -> Self {
        self.broker.address = address;
        self
    }

    pub fn with_mqtt_options(mut self, options: MqttOptions) -> Self {
        self.broker.options = options;
        self
    }

    pub fn with_topics(mut self, topics: TopicSet) -> Self {
        self.topics = topics;
        self
    }

    pub fn with_publish_interval(mut self, interval: Duration) -> Self {
        self.telemetry.interval = interval;
        self
    }

    pub fn with_reconnect(mut self, policy: BackoffPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_loop_period(mut self, period: Duration) -> Self {
        self.loop_period = period;
        self
    }

    pub fn with_shutdown_on_exit(mut self, enabled: bool) -> Self {
        self.shutdown_on_exit = enabled;
        self
    }

    pub fn with_control_topic_only(mut self, enabled: bool) -> Self {
        self.control_topic_only = enabled;
        self
    }
}
