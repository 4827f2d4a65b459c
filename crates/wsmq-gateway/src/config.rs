//! Server configuration.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tokio_tungstenite::tungstenite::protocol::WebSocketConfig as ProtocolConfig;
use wsmq_proto::MATCH_ALL;

/// Default maximum inbound WebSocket message size: 512 bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 512;

/// Default time allowed between two inbound frames.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Default time allowed for one outbound write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of each session's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Shortest keepalive ping interval; timers cannot tick with a zero period.
pub const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

/// Default capacity of the hub command channel.
pub const DEFAULT_HUB_CAPACITY: usize = 1024;

/// Configuration for WebSocket message handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// Maximum allowed inbound message size in bytes.
    /// Larger messages close the session.
    pub max_message_size: usize,
    /// Time allowed between two inbound frames of any kind.
    pub read_timeout: Duration,
    /// Time allowed for a single frame write.
    pub write_timeout: Duration,
    /// Capacity of the session's outbound queue.
    pub outbound_capacity: usize,
}

impl WebSocketConfig {
    /// Create a new WebSocket configuration with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }

    /// Set the maximum message size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the read timeout.
    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write timeout.
    #[must_use]
    pub const fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the outbound queue capacity.
    #[must_use]
    pub const fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Interval between keepalive pings: nine tenths of the read timeout,
    /// never shorter than [`MIN_PING_INTERVAL`].
    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        let nanos = self.read_timeout.as_nanos() / 10 * 9;
        if nanos < MIN_PING_INTERVAL.as_nanos() {
            return MIN_PING_INTERVAL;
        }
        Duration::from_nanos(nanos as u64)
    }

    /// Check if a message size is within the allowed limit.
    #[must_use]
    pub const fn is_message_size_valid(&self, size: usize) -> bool {
        size <= self.max_message_size
    }

    /// Protocol-level limits handed to the WebSocket handshake.
    #[must_use]
    pub fn protocol_config(&self) -> ProtocolConfig {
        let mut config = ProtocolConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_message_size);
        config
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// How sessions reach the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BridgeMode {
    /// Every session opens its own broker connection.
    #[default]
    PerSession,
    /// One broker connection subscribed to the shared topic; every inbound
    /// message is broadcast to all sessions.
    Shared,
}

impl fmt::Display for BridgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerSession => f.write_str("per-session"),
            Self::Shared => f.write_str("shared"),
        }
    }
}

impl FromStr for BridgeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-session" => Ok(Self::PerSession),
            "shared" => Ok(Self::Shared),
            other => Err(format!("unknown bridge mode '{other}'")),
        }
    }
}

/// Configuration for the gateway server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the WebSocket server to.
    pub bind_addr: SocketAddr,
    /// Maximum number of concurrent sessions.
    pub max_connections: usize,
    /// Timeout for the WebSocket handshake.
    pub connection_timeout: Duration,
    /// How sessions reach the broker.
    pub bridge_mode: BridgeMode,
    /// Filter subscribed by the shared bridge.
    pub shared_topic: String,
    /// Capacity of the hub command channel.
    pub hub_capacity: usize,
    /// WebSocket configuration.
    pub websocket: WebSocketConfig,
}

impl ServerConfig {
    /// Create a new server configuration with the specified bind address.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: 1000,
            connection_timeout: Duration::from_secs(10),
            bridge_mode: BridgeMode::default(),
            shared_topic: MATCH_ALL.to_string(),
            hub_capacity: DEFAULT_HUB_CAPACITY,
            websocket: WebSocketConfig::new(),
        }
    }

    /// Set the WebSocket configuration.
    #[must_use]
    pub const fn with_websocket_config(mut self, config: WebSocketConfig) -> Self {
        self.websocket = config;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub const fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the bridge mode.
    #[must_use]
    pub const fn with_bridge_mode(mut self, mode: BridgeMode) -> Self {
        self.bridge_mode = mode;
        self
    }

    /// Set the hub command channel capacity.
    #[must_use]
    pub const fn with_hub_capacity(mut self, capacity: usize) -> Self {
        self.hub_capacity = capacity;
        self
    }

    /// Set the filter subscribed in shared mode.
    #[must_use]
    pub fn with_shared_topic(mut self, topic: impl Into<String>) -> Self {
        self.shared_topic = topic.into();
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(([0, 0, 0, 0], 8080).into())
    }
}
