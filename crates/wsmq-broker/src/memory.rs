//! In-process loopback broker.
//!
//! [`MemoryBroker`] implements [`BrokerConnector`] without any network.
//! Messages published through one bridge are delivered to every connected
//! bridge with a matching subscription, including the publisher. It keeps a
//! record of what clients did and can inject broker-side failures, which
//! makes it the backend of choice for tests and local runs.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use wsmq_proto::{InboundMessage, filter_matches, validate_filter, validate_topic};

use crate::bridge::{BrokerBridge, BrokerConnector, BrokerFuture, MessageHandler};
use crate::error::{AckFailure, BrokerError};

/// Default number of publish and disconnect records the broker keeps.
pub const DEFAULT_RECORD_LIMIT: usize = 1024;

/// A publish accepted by the loopback broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRecord {
    /// Client that published, or an empty string for external publishes.
    pub client_id: String,
    /// Destination topic.
    pub topic: String,
    /// Message payload.
    pub payload: Vec<u8>,
}

struct ClientEntry {
    generation: u64,
    handler: MessageHandler,
    subscriptions: Vec<String>,
}

struct MemoryState {
    clients: HashMap<String, ClientEntry>,
    next_generation: u64,
    /// Most recent publishes, oldest first, at most `record_limit`.
    published: VecDeque<PublishRecord>,
    /// Client ids of the most recent disconnect calls, at most `record_limit`.
    disconnects: VecDeque<String>,
    total_disconnects: usize,
    record_limit: usize,
    refuse_connections: bool,
    reject_subscriptions: bool,
    reject_publishes: bool,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            clients: HashMap::new(),
            next_generation: 0,
            published: VecDeque::new(),
            disconnects: VecDeque::new(),
            total_disconnects: 0,
            record_limit: DEFAULT_RECORD_LIMIT,
            refuse_connections: false,
            reject_subscriptions: false,
            reject_publishes: false,
        }
    }
}

fn push_bounded<T>(log: &mut VecDeque<T>, item: T, limit: usize) {
    if limit == 0 {
        return;
    }
    while log.len() >= limit {
        log.pop_front();
    }
    log.push_back(item);
}

impl MemoryState {
    fn record_publish(&mut self, record: PublishRecord) {
        push_bounded(&mut self.published, record, self.record_limit);
    }

    fn record_disconnect(&mut self, client_id: &str) {
        self.total_disconnects += 1;
        push_bounded(&mut self.disconnects, client_id.to_string(), self.record_limit);
    }

    fn entry(&self, client_id: &str, generation: u64) -> Option<&ClientEntry> {
        self.clients
            .get(client_id)
            .filter(|entry| entry.generation == generation)
    }

    fn entry_mut(&mut self, client_id: &str, generation: u64) -> Option<&mut ClientEntry> {
        self.clients
            .get_mut(client_id)
            .filter(|entry| entry.generation == generation)
    }

    fn matching_handlers(&self, topic: &str) -> Vec<MessageHandler> {
        self.clients
            .values()
            .filter(|entry| {
                entry
                    .subscriptions
                    .iter()
                    .any(|filter| filter_matches(filter, topic))
            })
            .map(|entry| Arc::clone(&entry.handler))
            .collect()
    }
}

/// Loopback broker shared by every bridge it creates.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<MemoryState>>,
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryBroker")
            .field("clients", &state.clients.len())
            .field("published", &state.published.len())
            .finish_non_exhaustive()
    }
}

impl MemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty broker that keeps at most `limit` publish records and
    /// `limit` disconnect records. Older records are discarded first.
    #[must_use]
    pub fn with_record_limit(limit: usize) -> Self {
        let broker = Self::default();
        broker.state.lock().record_limit = limit;
        broker
    }

    /// Refuse (or accept again) new connections.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse_connections = refuse;
    }

    /// Reject (or accept again) every subscription request.
    pub fn reject_subscriptions(&self, reject: bool) {
        self.state.lock().reject_subscriptions = reject;
    }

    /// Reject (or accept again) every publish request.
    pub fn reject_publishes(&self, reject: bool) {
        self.state.lock().reject_publishes = reject;
    }

    /// Sever a client's connection as if the network dropped.
    ///
    /// Returns `false` if the client was not connected.
    pub fn drop_connection(&self, client_id: &str) -> bool {
        let removed = self.state.lock().clients.remove(client_id).is_some();
        if removed {
            debug!(client_id, "loopback broker dropped connection");
        }
        removed
    }

    /// Publish a message from outside any bridge.
    ///
    /// Returns the number of clients the message was delivered to.
    pub fn publish_external(&self, topic: &str, payload: &[u8]) -> usize {
        let handlers = {
            let mut state = self.state.lock();
            state.record_publish(PublishRecord {
                client_id: String::new(),
                topic: topic.to_string(),
                payload: payload.to_vec(),
            });
            state.matching_handlers(topic)
        };
        deliver(&handlers, topic, payload)
    }

    /// Publishes the broker accepted, oldest first, limited to the most
    /// recent records.
    #[must_use]
    pub fn published(&self) -> Vec<PublishRecord> {
        self.state.lock().published.iter().cloned().collect()
    }

    /// Identifiers of the currently connected clients, sorted.
    #[must_use]
    pub fn connected_clients(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().clients.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Filters held by a connected client.
    #[must_use]
    pub fn subscriptions_of(&self, client_id: &str) -> Vec<String> {
        self.state
            .lock()
            .clients
            .get(client_id)
            .map(|entry| entry.subscriptions.clone())
            .unwrap_or_default()
    }

    /// How many of the recorded `disconnect` calls were made for a client id.
    #[must_use]
    pub fn disconnect_calls(&self, client_id: &str) -> usize {
        self.state
            .lock()
            .disconnects
            .iter()
            .filter(|id| *id == client_id)
            .count()
    }

    /// Total `disconnect` calls across all clients.
    #[must_use]
    pub fn total_disconnect_calls(&self) -> usize {
        self.state.lock().total_disconnects
    }
}

fn deliver(handlers: &[MessageHandler], topic: &str, payload: &[u8]) -> usize {
    for handler in handlers {
        handler(InboundMessage::new(topic, payload.to_vec()));
    }
    handlers.len()
}

impl BrokerConnector for MemoryBroker {
    fn connect(
        &self,
        client_id: String,
        handler: MessageHandler,
    ) -> BrokerFuture<'_, Arc<dyn BrokerBridge>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            if state.refuse_connections {
                return Err(BrokerError::Connection(
                    "connection refused by broker".to_string(),
                ));
            }

            // A second connection with the same id takes the session over.
            let generation = state.next_generation;
            state.next_generation += 1;
            state.clients.insert(
                client_id.clone(),
                ClientEntry {
                    generation,
                    handler,
                    subscriptions: Vec::new(),
                },
            );
            drop(state);

            debug!(client_id = %client_id, "loopback broker accepted connection");
            Ok(Arc::new(MemoryBridge {
                broker: self.clone(),
                client_id,
                generation,
            }) as Arc<dyn BrokerBridge>)
        })
    }
}

/// Bridge handed out by [`MemoryBroker`].
struct MemoryBridge {
    broker: MemoryBroker,
    client_id: String,
    generation: u64,
}

impl BrokerBridge for MemoryBridge {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn is_connected(&self) -> bool {
        self.broker
            .state
            .lock()
            .entry(&self.client_id, self.generation)
            .is_some()
    }

    fn subscriptions(&self) -> Vec<String> {
        self.broker
            .state
            .lock()
            .entry(&self.client_id, self.generation)
            .map(|entry| entry.subscriptions.clone())
            .unwrap_or_default()
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.broker.state.lock();
            let reject = state.reject_subscriptions;
            let Some(entry) = state.entry_mut(&self.client_id, self.generation) else {
                return Err(BrokerError::subscribe(topic, AckFailure::ConnectionLost));
            };

            if reject || validate_filter(topic).is_err() {
                return Err(BrokerError::subscribe(topic, AckFailure::Rejected));
            }

            if !entry.subscriptions.iter().any(|existing| existing == topic) {
                entry.subscriptions.push(topic.to_string());
            }
            Ok(())
        })
    }

    fn publish<'a>(&'a self, topic: &'a str, payload: &'a [u8]) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            let handlers = {
                let mut state = self.broker.state.lock();
                if state.entry(&self.client_id, self.generation).is_none() {
                    return Err(BrokerError::publish(topic, AckFailure::ConnectionLost));
                }
                if state.reject_publishes || validate_topic(topic).is_err() {
                    return Err(BrokerError::publish(topic, AckFailure::Rejected));
                }

                state.record_publish(PublishRecord {
                    client_id: self.client_id.clone(),
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                });
                state.matching_handlers(topic)
            };

            deliver(&handlers, topic, payload);
            Ok(())
        })
    }

    fn disconnect(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.broker.state.lock();
            state.record_disconnect(&self.client_id);

            if state.entry(&self.client_id, self.generation).is_some() {
                state.clients.remove(&self.client_id);
            }
            Ok(())
        })
    }
}
