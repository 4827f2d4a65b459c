//! # wsmq-gateway
//!
//! WebSocket gateway that lets text clients talk to an MQTT broker.
//!
//! Each WebSocket client sends one command per frame (`sub <topic>`,
//! `pub <topic> <payload>`) and receives replies plus `rcv <topic> <payload>`
//! frames for every message delivered on its subscriptions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   WebSocket   ┌──────────────────────────┐   MQTT   ┌────────┐
//! │  client  │◄─────────────►│  ClientSession           │◄────────►│        │
//! └──────────┘               │   inbound / outbound     │          │ broker │
//! ┌──────────┐               │   pumps + BrokerBridge   │          │        │
//! │  client  │◄─────────────►│                          │◄────────►│        │
//! └──────────┘               │  Hub (live sessions)     │          └────────┘
//!                            └──────────────────────────┘
//! ```
//!
//! In [`BridgeMode::PerSession`] (the default) every session owns a broker
//! connection. In [`BridgeMode::Shared`] one connection subscribes to the
//! shared topic and the [`Hub`] broadcasts every message to all sessions.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wsmq_broker::MemoryBroker;
//! use wsmq_gateway::{GatewayServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let addr = "127.0.0.1:8080".parse().unwrap();
//!     let config = ServerConfig::new(addr).with_max_connections(100);
//!
//!     let mut server = GatewayServer::new(config, Arc::new(MemoryBroker::new()));
//!     server
//!         .serve(addr, async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//!         .unwrap();
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod monitor;
pub mod queue;
pub mod server;
pub mod session;

// Re-export main types
pub use config::{
    BridgeMode, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_OUTBOUND_CAPACITY, DEFAULT_READ_TIMEOUT,
    DEFAULT_WRITE_TIMEOUT, MIN_PING_INTERVAL, ServerConfig, WebSocketConfig,
};
pub use error::{ServerError, ServerResult};
pub use handlers::handle_line;
pub use hub::{Hub, HubCommand, HubHandle};
pub use monitor::{MONITOR_CLIENT_PREFIX, run_monitor};
pub use queue::{EnqueueError, OutboundQueue, OutboundReceiver, outbound_queue};
pub use server::{GatewayServer, SESSION_CLIENT_PREFIX, open_session_bridge};
pub use session::{
    ClientSession, SessionBridge, SessionEnd, coalesce, process_ws_message,
    process_ws_message_with_limits, run_session, validate_message_size, ws_message_size,
};
