//! MQTT bridge backed by `rumqttc`.
//!
//! Each [`MqttBridge`] owns one `AsyncClient` and a background task that
//! drives its event loop. The task delivers incoming publishes to the
//! bridge's [`MessageHandler`] and matches SUBACK/PUBACK packets to the
//! callers waiting on them, so `subscribe` and `publish` only return once
//! the broker has acknowledged the request.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ClientError, Event, EventLoop, MqttOptions, Outgoing, Packet, SubscribeReasonCode,
    Transport,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use wsmq_proto::InboundMessage;

use crate::bridge::{BrokerBridge, BrokerConnector, BrokerFuture, MessageHandler};
use crate::error::{AckFailure, BrokerError, BrokerResult};
use crate::settings::{BrokerSettings, DEFAULT_QOS};

type AckSender = oneshot::Sender<Result<(), AckFailure>>;
type AckReceiver = oneshot::Receiver<Result<(), AckFailure>>;

/// Waiters for one acknowledgement kind.
///
/// Requests are queued in the order they were handed to the client. The
/// event loop sends them in the same order, so the packet id reported for
/// each outgoing packet belongs to the front waiter.
#[derive(Default)]
struct AckQueue {
    queued: VecDeque<AckSender>,
    in_flight: HashMap<u16, AckSender>,
}

impl AckQueue {
    fn enqueue(&mut self) -> AckReceiver {
        let (tx, rx) = oneshot::channel();
        self.queued.push_back(tx);
        rx
    }

    fn cancel_last(&mut self) {
        self.queued.pop_back();
    }

    fn sent(&mut self, pkid: u16) {
        if let Some(tx) = self.queued.pop_front() {
            self.in_flight.insert(pkid, tx);
        }
    }

    fn resolve(&mut self, pkid: u16, result: Result<(), AckFailure>) {
        if let Some(tx) = self.in_flight.remove(&pkid) {
            let _ = tx.send(result);
        }
    }

    /// Drop every waiter. Receivers observe a closed channel.
    fn fail_all(&mut self) {
        self.queued.clear();
        self.in_flight.clear();
    }
}

#[derive(Default)]
struct PendingAcks {
    subscribe: AckQueue,
    publish: AckQueue,
}

struct BridgeState {
    pending: Mutex<PendingAcks>,
    connected: AtomicBool,
    closing: AtomicBool,
}

/// Build client options for `settings`.
fn mqtt_options(settings: &BrokerSettings, client_id: &str) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, settings.host.clone(), settings.port);
    options.set_keep_alive(settings.keep_alive);
    options.set_clean_session(true);

    if let Some(credentials) = &settings.credentials {
        options.set_credentials(credentials.username.clone(), credentials.password.clone());
        options.set_transport(Transport::tls_with_default_config());
    }

    options
}

fn subscribe_result(return_codes: &[SubscribeReasonCode]) -> Result<(), AckFailure> {
    if return_codes
        .iter()
        .any(|code| matches!(code, SubscribeReasonCode::Failure))
    {
        Err(AckFailure::Rejected)
    } else {
        Ok(())
    }
}

/// A live MQTT connection.
pub struct MqttBridge {
    client_id: String,
    client: AsyncClient,
    settings: BrokerSettings,
    state: Arc<BridgeState>,
    subscriptions: Mutex<Vec<String>>,
    request_lock: tokio::sync::Mutex<()>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBridge {
    /// Connect to the broker and wait for CONNACK.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Connection`] if the broker is unreachable,
    /// refuses the connection, or does not answer within the connect timeout.
    pub async fn connect(
        settings: &BrokerSettings,
        client_id: String,
        handler: MessageHandler,
    ) -> BrokerResult<Self> {
        let options = mqtt_options(settings, &client_id);
        let (client, mut eventloop) = AsyncClient::new(options, settings.request_capacity);

        let handshake = timeout(settings.connect_timeout, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(BrokerError::Connection(e.to_string())),
                }
            }
        })
        .await;

        match handshake {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(BrokerError::Connection(format!(
                    "no CONNACK from {} within {:?}",
                    settings.url(),
                    settings.connect_timeout
                )));
            }
        }

        info!(client_id = %client_id, broker = %settings.url(), "connected to broker");

        let state = Arc::new(BridgeState {
            pending: Mutex::new(PendingAcks::default()),
            connected: AtomicBool::new(true),
            closing: AtomicBool::new(false),
        });

        let driver = tokio::spawn(drive_event_loop(
            eventloop,
            Arc::clone(&state),
            handler,
            client_id.clone(),
        ));

        Ok(Self {
            client_id,
            client,
            settings: settings.clone(),
            state,
            subscriptions: Mutex::new(Vec::new()),
            request_lock: tokio::sync::Mutex::new(()),
            driver: Mutex::new(Some(driver)),
        })
    }

    fn request_failure(&self, err: &ClientError) -> AckFailure {
        if self.is_connected() {
            AckFailure::Request(err.to_string())
        } else {
            AckFailure::ConnectionLost
        }
    }

    async fn await_ack(&self, rx: AckReceiver) -> Result<(), AckFailure> {
        match timeout(self.settings.ack_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AckFailure::ConnectionLost),
            Err(_) => Err(AckFailure::Timeout(self.settings.ack_timeout)),
        }
    }

    async fn request_subscribe(&self, topic: &str) -> Result<(), AckFailure> {
        if !self.is_connected() {
            return Err(AckFailure::ConnectionLost);
        }

        let rx = {
            let _guard = self.request_lock.lock().await;
            let rx = self.state.pending.lock().subscribe.enqueue();
            if let Err(e) = self.client.subscribe(topic, DEFAULT_QOS).await {
                self.state.pending.lock().subscribe.cancel_last();
                return Err(self.request_failure(&e));
            }
            rx
        };

        self.await_ack(rx).await
    }

    async fn request_publish(&self, topic: &str, payload: &[u8]) -> Result<(), AckFailure> {
        if !self.is_connected() {
            return Err(AckFailure::ConnectionLost);
        }

        let rx = {
            let _guard = self.request_lock.lock().await;
            let rx = self.state.pending.lock().publish.enqueue();
            if let Err(e) = self
                .client
                .publish(topic, DEFAULT_QOS, false, payload.to_vec())
                .await
            {
                self.state.pending.lock().publish.cancel_last();
                return Err(self.request_failure(&e));
            }
            rx
        };

        self.await_ack(rx).await
    }
}

impl BrokerBridge for MqttBridge {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            self.request_subscribe(topic)
                .await
                .map_err(|cause| BrokerError::subscribe(topic, cause))?;

            self.subscriptions.lock().push(topic.to_string());
            debug!(client_id = %self.client_id, topic, "subscribed");
            Ok(())
        })
    }

    fn publish<'a>(&'a self, topic: &'a str, payload: &'a [u8]) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            self.request_publish(topic, payload)
                .await
                .map_err(|cause| BrokerError::publish(topic, cause))?;

            debug!(client_id = %self.client_id, topic, bytes = payload.len(), "published");
            Ok(())
        })
    }

    fn disconnect(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            if self.state.closing.swap(true, Ordering::SeqCst) {
                return Ok(());
            }

            if let Err(e) = self.client.try_disconnect() {
                debug!(client_id = %self.client_id, error = %e, "disconnect request not queued");
            }

            let driver = self.driver.lock().take();
            if let Some(mut handle) = driver {
                if timeout(self.settings.disconnect_grace, &mut handle)
                    .await
                    .is_err()
                {
                    debug!(client_id = %self.client_id, "event loop did not stop within grace period");
                    handle.abort();
                }
            }

            self.state.connected.store(false, Ordering::SeqCst);
            info!(client_id = %self.client_id, "disconnected from broker");
            Ok(())
        })
    }
}

impl Drop for MqttBridge {
    fn drop(&mut self) {
        if let Some(handle) = self.driver.get_mut().take() {
            handle.abort();
        }
    }
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    state: Arc<BridgeState>,
    handler: MessageHandler,
    client_id: String,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handler(InboundMessage::new(publish.topic, publish.payload.to_vec()));
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let result = subscribe_result(&ack.return_codes);
                state.pending.lock().subscribe.resolve(ack.pkid, result);
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                state.pending.lock().publish.resolve(ack.pkid, Ok(()));
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                state.pending.lock().subscribe.sent(pkid);
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                state.pending.lock().publish.sent(pkid);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                if !state.closing.load(Ordering::SeqCst) {
                    warn!(client_id = %client_id, error = %e, "broker connection lost");
                }
                break;
            }
        }
    }

    state.connected.store(false, Ordering::SeqCst);
    let mut pending = state.pending.lock();
    pending.subscribe.fail_all();
    pending.publish.fail_all();
}

/// Connector that opens [`MqttBridge`]s with fixed settings.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    settings: BrokerSettings,
}

impl MqttConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new(settings: BrokerSettings) -> Self {
        Self { settings }
    }

    /// Settings used for every connection.
    #[must_use]
    pub const fn settings(&self) -> &BrokerSettings {
        &self.settings
    }
}

impl BrokerConnector for MqttConnector {
    fn connect(
        &self,
        client_id: String,
        handler: MessageHandler,
    ) -> BrokerFuture<'_, Arc<dyn BrokerBridge>> {
        Box::pin(async move {
            let bridge = MqttBridge::connect(&self.settings, client_id, handler).await?;
            Ok(Arc::new(bridge) as Arc<dyn BrokerBridge>)
        })
    }
}
