//! Error types for the wsmq-proto crate.

use thiserror::Error;

/// Errors that can occur while validating protocol values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    /// Topic names and filters must not be empty.
    #[error("topic cannot be empty")]
    EmptyTopic,

    /// Topic exceeds the MQTT length limit.
    #[error("topic is {len} bytes, limit is {limit}")]
    TopicTooLong {
        /// Length of the rejected topic in bytes.
        len: usize,
        /// Maximum allowed length in bytes.
        limit: usize,
    },

    /// Wildcards are only allowed in subscription filters.
    #[error("wildcard not allowed in topic name: {0}")]
    WildcardInTopic(String),

    /// A wildcard is placed somewhere MQTT does not allow it.
    #[error("invalid wildcard placement in filter: {0}")]
    InvalidWildcard(String),

    /// Topic contains a NUL character.
    #[error("topic contains a NUL character")]
    NulCharacter,
}

/// Result type for protocol operations.
pub type ProtoResult<T> = Result<T, ProtoError>;
