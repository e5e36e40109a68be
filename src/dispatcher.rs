//! Control message dispatcher.
//!
//! Maps inbound messages to actions: LED commands carried by any subscribed
//! topic (or the control topic alone, if so configured), plus the `/print`,
//! `/ping` and `/exit` diagnostics.

use embedded_hal::digital::OutputPin;

use crate::client::InboundMessage;
use crate::config::{NodeConfig, TopicSet};
use crate::fmt::Dbg;
use crate::runtime::{MqttModule, TopicCollector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedCommand {
    On,
    Off,
}

/// Parses a control payload.
///
/// `1`, `O`, `o` and `on` in any case switch the LED on; `0` and `off` in any
/// case switch it off. Anything else is not a command.
pub fn parse_command(payload: &[u8]) -> Option<LedCommand> {
    match payload {
        b"1" | b"O" | b"o" => Some(LedCommand::On),
        b"0" => Some(LedCommand::Off),
        p if p.eq_ignore_ascii_case(b"on") => Some(LedCommand::On),
        p if p.eq_ignore_ascii_case(b"off") => Some(LedCommand::Off),
        _ => None,
    }
}

pub struct ControlDispatcher<P> {
    led: P,
    topics: TopicSet,
    shutdown_on_exit: bool,
    control_topic_only: bool,
    exit_requested: bool,
}

impl<P: OutputPin> ControlDispatcher<P> {
    /// Takes the LED line and drives it low.
    pub fn new(led: P, config: &NodeConfig) -> Self {
        let mut dispatcher = Self {
            led,
            topics: config.topics,
            shutdown_on_exit: config.shutdown_on_exit,
            control_topic_only: config.control_topic_only,
            exit_requested: false,
        };
        dispatcher.apply(LedCommand::Off);
        dispatcher
    }

    pub fn led(&self) -> &P {
        &self.led
    }

    /// Drives the LED line, high meaning on.
    pub fn apply(&mut self, command: LedCommand) {
        let result = match command {
            LedCommand::On => self.led.set_high(),
            LedCommand::Off => self.led.set_low(),
        };
        match result {
            Ok(()) => info!("LED {}", if command == LedCommand::On { "on" } else { "off" }),
            Err(e) => warn!("LED write failed: {:?}", Dbg(&e)),
        }
    }

    fn handle_diagnostic(&mut self, topic: &str, text: &str) {
        let Some(diagnostics) = self.topics.diagnostics else {
            return;
        };
        if topic == diagnostics.print {
            info!("print: {}", text);
        } else if topic == diagnostics.ping {
            info!("ping received");
        } else if topic == diagnostics.exit {
            if self.shutdown_on_exit {
                info!("Exit requested");
                self.exit_requested = true;
            } else {
                info!("Exit request ignored");
            }
        }
    }
}

impl<P: OutputPin> MqttModule for ControlDispatcher<P> {
    fn register(&self, collector: &mut dyn TopicCollector) {
        for topic in self.topics.subscriptions() {
            if !collector.add(topic) {
                warn!("Topic registry full, {} not subscribed", topic);
            }
        }
    }

    fn on_message(&mut self, msg: &InboundMessage) {
        let topic = msg.topic.as_str();
        let text = msg.payload_str().unwrap_or("<binary>");
        info!("Message on {}: {}", topic, text);

        let is_control = topic == self.topics.control;
        if !is_control {
            self.handle_diagnostic(topic, text);
            if self.control_topic_only {
                return;
            }
        }

        match parse_command(&msg.payload) {
            Some(command) => self.apply(command),
            None if is_control => warn!("Ignoring unknown command {}", text),
            None => {}
        }
    }

    fn stop_requested(&self) -> bool {
        self.exit_requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TopicRegistry;
    use crate::testing::MockPin;

    fn message(topic: &str, payload: &[u8]) -> InboundMessage {
        InboundMessage::new(topic, payload).unwrap()
    }

    fn dispatcher(config: &NodeConfig) -> ControlDispatcher<MockPin> {
        ControlDispatcher::new(MockPin::default(), config)
    }

    #[test]
    fn parses_on_and_off_in_any_case() {
        for on in [&b"1"[..], b"On", b"ON", b"on", b"oN", b"O", b"o"] {
            assert_eq!(parse_command(on), Some(LedCommand::On), "{on:?}");
        }
        for off in [&b"0"[..], b"Off", b"OFF", b"off", b"oFf"] {
            assert_eq!(parse_command(off), Some(LedCommand::Off), "{off:?}");
        }
        for junk in [&b"xyz"[..], b"", b"10", b"onn", b" on", b"2"] {
            assert_eq!(parse_command(junk), None, "{junk:?}");
        }
    }

    #[test]
    fn control_topic_drives_led() {
        let mut dispatcher = dispatcher(&NodeConfig::default());

        dispatcher.on_message(&message("/light", b"On"));
        assert_eq!(dispatcher.led().state, Some(true));
        dispatcher.on_message(&message("/light", b"0"));
        assert_eq!(dispatcher.led().state, Some(false));
        dispatcher.on_message(&message("/light", b"xyz"));
        assert_eq!(dispatcher.led().state, Some(false));
        // Startup write plus the two commands.
        assert_eq!(dispatcher.led().writes, 3);
    }

    #[test]
    fn led_starts_low() {
        let dispatcher = dispatcher(&NodeConfig::default());
        assert_eq!(dispatcher.led().state, Some(false));
        assert_eq!(dispatcher.led().writes, 1);
    }

    #[test]
    fn commands_on_any_subscribed_topic_actuate() {
        let mut dispatcher = dispatcher(&NodeConfig::default());

        dispatcher.on_message(&message("/print", b"1"));
        assert_eq!(dispatcher.led().state, Some(true));
        dispatcher.on_message(&message("/ping", b"off"));
        assert_eq!(dispatcher.led().state, Some(false));
        dispatcher.on_message(&message("/print", b"hello"));
        assert_eq!(dispatcher.led().writes, 3);
        assert!(!dispatcher.stop_requested());
    }

    #[test]
    fn exit_with_command_payload_actuates_and_stops() {
        let mut dispatcher = dispatcher(&NodeConfig::default());

        dispatcher.on_message(&message("/exit", b"On"));
        assert_eq!(dispatcher.led().state, Some(true));
        assert!(dispatcher.stop_requested());
    }

    #[test]
    fn control_topic_only_ignores_commands_elsewhere() {
        let config = NodeConfig::default().with_control_topic_only(true);
        let mut dispatcher = dispatcher(&config);

        dispatcher.on_message(&message("/print", b"1"));
        dispatcher.on_message(&message("/ping", b"on"));
        assert_eq!(dispatcher.led().state, Some(false));
        assert_eq!(dispatcher.led().writes, 1);

        dispatcher.on_message(&message("/light", b"1"));
        assert_eq!(dispatcher.led().state, Some(true));
    }

    #[test]
    fn exit_honoured_only_when_enabled() {
        let mut enabled = dispatcher(&NodeConfig::default());
        enabled.on_message(&message("/exit", b""));
        assert!(enabled.stop_requested());

        let mut disabled = dispatcher(&NodeConfig::default().with_shutdown_on_exit(false));
        disabled.on_message(&message("/exit", b""));
        assert!(!disabled.stop_requested());
    }

    #[test]
    fn registers_configured_topics() {
        let mut registry = TopicRegistry::<8>::new();
        dispatcher(&NodeConfig::default()).register(&mut registry);
        assert_eq!(registry.len(), 4);

        let mut registry = TopicRegistry::<8>::new();
        dispatcher(&NodeConfig::default().with_topics(TopicSet::control_only()))
            .register(&mut registry);
        assert_eq!(registry.iter().collect::<std::vec::Vec<_>>(), ["/light"]);
    }
}
