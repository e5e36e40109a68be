//! Node runtime.
//!
//! # Overview
//!
//! The runtime ties the session supervisor to the node's modules:
//! - Topic registration (modules declare what they subscribe to)
//! - Inbound message dispatch
//! - Periodic work (telemetry sampling) with buffered publishing
//!
//! # Object-Safe Design
//!
//! The `MqttModule` trait is dyn-compatible, so `&mut dyn MqttModule` can be
//! handed to the runtime when the concrete module type should stay out of the
//! task signature.

pub(crate) mod event_loop;
pub(crate) mod publisher;
pub(crate) mod registry;
pub(crate) mod traits;

pub use event_loop::{NodeRuntime, Step};
pub use publisher::{BufferedOutbox, OwnedPublishRequest};
pub use registry::{MAX_TOPIC_LEN, TopicRegistry};
pub use traits::{ModulePair, MqttModule, PublishOutbox, TopicCollector};
