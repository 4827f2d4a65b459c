//! Replies sent back to the client that issued a command.

use std::fmt;

/// A human-readable acknowledgement or error for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Subscription accepted by the broker.
    Subscribed {
        /// Topic filter that was subscribed.
        topic: String,
    },
    /// Message handed to the broker.
    Published {
        /// Destination topic.
        topic: String,
        /// Published payload.
        payload: String,
    },
    /// `pub` command without a payload.
    PublishMessageNotFound,
    /// Verb not understood.
    Unrecognized,
    /// The broker refused or failed the operation.
    Error(String),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribed { topic } => write!(f, "info subscribed to {topic}"),
            Self::Published { topic, payload } => write!(f, "pub {topic} {payload}"),
            Self::PublishMessageNotFound => f.write_str("publish message not found"),
            Self::Unrecognized => f.write_str("err unrecognized command"),
            Self::Error(reason) => write!(f, "err {reason}"),
        }
    }
}

impl Reply {
    /// Whether the reply reports a failure to the client.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Unrecognized | Self::Error(_))
    }
}
