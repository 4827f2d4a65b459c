//! Error types for broker operations.

use std::time::Duration;

use thiserror::Error;

/// Why the broker did not acknowledge a subscribe or publish.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AckFailure {
    /// The broker answered with a failure code.
    #[error("rejected by broker")]
    Rejected,

    /// The client library refused the request before it reached the broker.
    #[error("request refused: {0}")]
    Request(String),

    /// No acknowledgement arrived in time.
    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),

    /// The broker connection is gone.
    #[error("connection lost")]
    ConnectionLost,
}

/// Errors that can occur while talking to the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Could not reach the broker or the broker refused the connection.
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// Subscription was not accepted.
    #[error("subscribe to '{topic}' failed: {cause}")]
    Subscribe {
        /// Topic filter that was requested.
        topic: String,
        /// Underlying failure.
        cause: AckFailure,
    },

    /// Publish was not accepted.
    #[error("publish to '{topic}' failed: {cause}")]
    Publish {
        /// Destination topic.
        topic: String,
        /// Underlying failure.
        cause: AckFailure,
    },

    /// Broker settings or secrets are invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    /// Build a subscribe error.
    pub fn subscribe(topic: impl Into<String>, cause: AckFailure) -> Self {
        Self::Subscribe {
            topic: topic.into(),
            cause,
        }
    }

    /// Build a publish error.
    pub fn publish(topic: impl Into<String>, cause: AckFailure) -> Self {
        Self::Publish {
            topic: topic.into(),
            cause,
        }
    }

    /// Whether the error means the broker connection itself is gone.
    ///
    /// Callers keep a session alive for every other broker error.
    #[must_use]
    pub const fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Subscribe {
                    cause: AckFailure::ConnectionLost,
                    ..
                }
                | Self::Publish {
                    cause: AckFailure::ConnectionLost,
                    ..
                }
        )
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("invalid secrets document: {err}"))
    }
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;
