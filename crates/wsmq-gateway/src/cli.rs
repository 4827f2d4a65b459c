//! Command-line argument parsing with clap.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use wsmq_broker::{
    BrokerConnector, BrokerResult, BrokerSecrets, BrokerSettings, MemoryBroker, MqttConnector,
};
use wsmq_proto::MATCH_ALL;

use crate::config::{BridgeMode, ServerConfig};

/// wsmq - WebSocket to MQTT gateway.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsmq")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, env = "WSMQ_LOG_FORMAT", default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Log output formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the WebSocket gateway.
    Serve(ServeArgs),

    /// Print broker traffic as `topic:payload` lines.
    Monitor(MonitorArgs),
}

/// Which broker backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum BrokerKind {
    /// MQTT broker from the secrets file.
    #[default]
    Mqtt,
    /// In-process loopback broker.
    Memory,
}

/// How sessions reach the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// One broker connection per session.
    #[default]
    PerSession,
    /// One broker connection shared by all sessions.
    Shared,
}

impl From<ModeArg> for BridgeMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::PerSession => Self::PerSession,
            ModeArg::Shared => Self::Shared,
        }
    }
}

/// Broker selection shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct BrokerArgs {
    /// Broker backend.
    #[arg(long, value_enum, default_value_t = BrokerKind::Mqtt)]
    pub broker: BrokerKind,

    /// Secrets file holding the broker settings.
    #[arg(long, env = "WSMQ_SECRETS", default_value = "secrets.json")]
    pub secrets: PathBuf,

    /// Environment name under the secrets file's `mqtt` section.
    #[arg(long, env = "WSMQ_ENV", default_value = "mqtt_docker_esp")]
    pub env: String,
}

impl BrokerArgs {
    /// Build the connector selected by these arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if the secrets cannot be loaded.
    pub fn connector(&self) -> BrokerResult<Arc<dyn BrokerConnector>> {
        match self.broker {
            BrokerKind::Memory => Ok(Arc::new(MemoryBroker::new())),
            BrokerKind::Mqtt => {
                let secrets = BrokerSecrets::from_file(&self.secrets, &self.env)?;
                let settings = BrokerSettings::from_secrets(&secrets)?;
                Ok(Arc::new(MqttConnector::new(settings)))
            }
        }
    }
}

/// Arguments for `wsmq serve`.
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "WSMQ_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Broker connection mode.
    #[arg(long, value_enum, default_value_t = ModeArg::PerSession)]
    pub mode: ModeArg,

    /// Maximum number of concurrent sessions.
    #[arg(long, default_value = "1000")]
    pub max_connections: usize,

    /// Filter subscribed by the shared bridge.
    #[arg(long, default_value = MATCH_ALL)]
    pub shared_topic: String,

    /// Broker selection.
    #[command(flatten)]
    pub broker: BrokerArgs,
}

impl ServeArgs {
    /// Server configuration described by these arguments.
    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.bind)
            .with_max_connections(self.max_connections)
            .with_bridge_mode(self.mode.into())
            .with_shared_topic(self.shared_topic.clone())
    }
}

/// Arguments for `wsmq monitor`.
#[derive(Args, Debug, Clone)]
pub struct MonitorArgs {
    /// Topic filters to watch (repeatable).
    #[arg(long = "topic", default_value = MATCH_ALL)]
    pub topics: Vec<String>,

    /// Broker selection.
    #[command(flatten)]
    pub broker: BrokerArgs,
}
