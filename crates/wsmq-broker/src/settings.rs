//! Broker connection settings and the secrets document they are loaded from.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use rumqttc::QoS;
use serde::Deserialize;

use crate::error::{BrokerError, BrokerResult};

/// Quality of service used for every subscribe and publish.
pub const DEFAULT_QOS: QoS = QoS::AtLeastOnce;

/// Default MQTT keep-alive interval.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Default time allowed for the broker to accept a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for a SUBACK or PUBACK.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period granted to a graceful disconnect.
pub const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_millis(250);

/// Default capacity of the client's request queue.
pub const DEFAULT_REQUEST_CAPACITY: usize = 64;

/// Username/password pair for the broker.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Broker username.
    pub username: String,
    /// Broker password.
    pub password: String,
}

impl Credentials {
    /// Create a credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Settings for one broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Broker host name or address.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Optional credentials. Their presence also selects TLS.
    pub credentials: Option<Credentials>,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Time allowed to receive CONNACK.
    pub connect_timeout: Duration,
    /// Time allowed to receive SUBACK/PUBACK.
    pub ack_timeout: Duration,
    /// Grace period for a graceful disconnect.
    pub disconnect_grace: Duration,
    /// Capacity of the client request queue.
    pub request_capacity: usize,
}

impl BrokerSettings {
    /// Create settings for a plain TCP connection to `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
            keep_alive: DEFAULT_KEEP_ALIVE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
            request_capacity: DEFAULT_REQUEST_CAPACITY,
        }
    }

    /// Build settings from a secrets entry.
    ///
    /// # Errors
    ///
    /// Returns an error if a username is given without a password.
    pub fn from_secrets(secrets: &BrokerSecrets) -> BrokerResult<Self> {
        let settings = Self::new(secrets.server.clone(), secrets.port);
        match (&secrets.username, &secrets.password) {
            (Some(username), Some(password)) => {
                Ok(settings.with_credentials(Credentials::new(username, password)))
            }
            (Some(username), None) => Err(BrokerError::Config(format!(
                "password missing for broker user '{username}'"
            ))),
            (None, _) => Ok(settings),
        }
    }

    /// Set the credentials (switches the transport to TLS).
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the keep-alive interval.
    #[must_use]
    pub const fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the acknowledgement timeout.
    #[must_use]
    pub const fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the disconnect grace period.
    #[must_use]
    pub const fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }

    /// Whether the connection uses TLS.
    #[must_use]
    pub const fn uses_tls(&self) -> bool {
        self.credentials.is_some()
    }

    /// Broker address as `tcp://host:port` or `tls://host:port`.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.uses_tls() { "tls" } else { "tcp" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// Broker entry of the secrets document.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct BrokerSecrets {
    /// Broker host.
    pub server: String,
    /// Broker port.
    pub port: u16,
    /// Optional username.
    #[serde(default)]
    pub username: Option<String>,
    /// Optional password.
    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for BrokerSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerSecrets")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Deserialize)]
struct SecretsDocument {
    #[serde(default)]
    mqtt: HashMap<String, BrokerSecrets>,
}

impl BrokerSecrets {
    /// Load the broker entry for `env` from a secrets file.
    ///
    /// The file is a JSON object whose `mqtt` member maps environment names
    /// to broker entries. Other members are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not contain the
    /// requested environment.
    pub fn from_file(path: impl AsRef<Path>, env: &str) -> BrokerResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            BrokerError::Config(format!(
                "failed to read secrets file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_json(&content, env)
    }

    /// Parse the broker entry for `env` from a secrets document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or the environment is missing.
    pub fn from_json(content: &str, env: &str) -> BrokerResult<Self> {
        let mut document: SecretsDocument = serde_json::from_str(content)?;
        document
            .mqtt
            .remove(env)
            .ok_or_else(|| BrokerError::Config(format!("no mqtt environment named '{env}'")))
    }
}
