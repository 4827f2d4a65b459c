//! # wsmq-broker
//!
//! Broker bridge for the wsmq gateway.
//!
//! A [`BrokerBridge`] is one logical connection to the publish/subscribe
//! broker. Bridges are created by a [`BrokerConnector`], which receives the
//! client identifier and the [`MessageHandler`] invoked for every message
//! the broker delivers. Handlers run on the bridge's delivery path and must
//! only enqueue work.
//!
//! Two connectors are provided:
//!
//! - [`MqttConnector`]: a real MQTT connection driven by `rumqttc`
//! - [`MemoryBroker`]: an in-process loopback broker for tests and local runs
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wsmq_broker::{
//!     BrokerConnector, BrokerSettings, InboundMessage, MqttConnector, generate_client_id,
//! };
//!
//! # async fn run() -> wsmq_broker::BrokerResult<()> {
//! let connector = MqttConnector::new(BrokerSettings::new("127.0.0.1", 1883));
//! let bridge = connector
//!     .connect(
//!         generate_client_id("example_"),
//!         Arc::new(|msg: InboundMessage| println!("{}", msg.render())),
//!     )
//!     .await?;
//! bridge.subscribe("sensors/+").await?;
//! bridge.publish("sensors/temp", b"21.5").await?;
//! bridge.disconnect().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bridge;
pub mod client_id;
pub mod error;
pub mod memory;
pub mod mqtt;
pub mod settings;

pub use bridge::{BrokerBridge, BrokerConnector, BrokerFuture, MessageHandler};
pub use client_id::{MAX_CLIENT_ID_LEN, RANDOM_SUFFIX_LEN, generate_client_id};
pub use error::{AckFailure, BrokerError, BrokerResult};
pub use memory::{DEFAULT_RECORD_LIMIT, MemoryBroker, PublishRecord};
pub use mqtt::{MqttBridge, MqttConnector};
pub use settings::{BrokerSecrets, BrokerSettings, Credentials, DEFAULT_QOS};
pub use wsmq_proto::InboundMessage;
