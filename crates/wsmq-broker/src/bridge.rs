//! Broker bridge traits.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use wsmq_proto::InboundMessage;

use crate::error::BrokerResult;

/// Boxed future returned by bridge operations.
pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = BrokerResult<T>> + Send + 'a>>;

/// Callback invoked once per message delivered by the broker.
///
/// Runs on the bridge's delivery path: it must not block and should only
/// hand the message off (for example with a non-blocking channel send).
pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// One logical connection to the broker.
pub trait BrokerBridge: Send + Sync {
    /// Client identifier used for this connection.
    fn client_id(&self) -> &str;

    /// Whether the underlying connection is still up.
    fn is_connected(&self) -> bool;

    /// Topic filters successfully subscribed on this connection.
    fn subscriptions(&self) -> Vec<String>;

    /// Subscribe to a topic filter.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Subscribe`](crate::BrokerError::Subscribe) if the
    /// broker rejects the filter or the connection is lost.
    fn subscribe<'a>(&'a self, topic: &'a str) -> BrokerFuture<'a, ()>;

    /// Publish one message at the configured quality of service.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Publish`](crate::BrokerError::Publish) if the
    /// broker rejects the message or the connection is lost.
    fn publish<'a>(&'a self, topic: &'a str, payload: &'a [u8]) -> BrokerFuture<'a, ()>;

    /// Gracefully close the connection. Calling it again is a no-op.
    fn disconnect(&self) -> BrokerFuture<'_, ()>;
}

/// Factory for broker bridges.
pub trait BrokerConnector: Send + Sync {
    /// Open a new bridge.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Connection`](crate::BrokerError::Connection) if
    /// the broker is unreachable or refuses the credentials.
    fn connect(
        &self,
        client_id: String,
        handler: MessageHandler,
    ) -> BrokerFuture<'_, Arc<dyn BrokerBridge>>;
}
