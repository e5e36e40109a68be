//! # Light sensor / LED node supervisor
//!
//! `myrtio-lightnode` keeps a small WiFi node connected to an MQTT broker,
//! publishes its light sensor readings, and switches its LED on command. It is
//! `no_std` and `no_alloc`, built on the [Embassy](https://embassy.dev/) async
//! ecosystem.
//!
//! ## Architecture
//!
//! - [`network`] joins the WiFi network once at startup, retrying timeouts forever.
//! - [`session::Session`] supervises the broker session: connect, subscribe on
//!   acceptance, and reconnect after every refusal or loss with a bounded
//!   [`backoff::BackoffPolicy`] delay.
//! - [`telemetry::TelemetryPublisher`] samples the sensor every interval and
//!   publishes readings that changed.
//! - [`dispatcher::ControlDispatcher`] turns command payloads into LED states
//!   and handles the diagnostic topics.
//! - [`runtime::NodeRuntime`] is the cooperative loop that drives all of the above.
//!
//! The broker connection itself is behind the [`MessagingClient`] trait.
//! [`MqttClient`] implements it for MQTT 3.1.1 over any [`transport::MqttTransport`],
//! such as the provided [`TcpTransport`].
//!
//! ```ignore
//! let config = NodeConfig::default();
//! let module = ModulePair::new(
//!     ControlDispatcher::new(led, &config),
//!     TelemetryPublisher::new(ldr, &config, Instant::now()),
//! );
//! let client = MqttClient::<_, 1024>::new(TcpTransport::new(socket, Duration::from_millis(5)));
//! let mut node = NodeRuntime::new(client, &config, module, SystemClock, Delay);
//! node.run_with_network(&mut radio).await?;
//! ```

#![cfg_attr(not(test), no_std)]

mod fmt;

pub mod backoff;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod network;
pub mod packet;
pub mod runtime;
pub mod session;
pub mod telemetry;
pub mod time;
pub mod transport;
pub mod util;

#[cfg(test)]
mod testing;

// Re-export key types for easier access at the crate root.
pub use client::{ConnectionStatus, MessagingClient, MqttClient, MqttEvent, MqttOptions};
pub use config::NodeConfig;
pub use packet::QoS;
pub use transport::TcpTransport;
