//! Per-client WebSocket session management.
//!
//! A session is driven by two tasks. The inbound pump is the only reader
//! of the WebSocket: it parses commands, runs them against the broker
//! bridge and queues the replies. The outbound pump is the only writer: it
//! drains the outbound queue into text frames and sends keepalive pings.
//! Whichever pump stops first runs the session cleanup; the cleanup then
//! stops the other pump.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at, timeout};
use tokio_tungstenite::tungstenite::error::CapacityError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wsmq_broker::BrokerBridge;
use wsmq_proto::{Reply, normalize_frame};

use crate::config::WebSocketConfig;
use crate::error::{ServerError, ServerResult};
use crate::handlers::handle_line;
use crate::hub::HubHandle;
use crate::queue::{EnqueueError, OutboundQueue, OutboundReceiver};

/// The broker bridge a session talks through.
#[derive(Clone)]
pub enum SessionBridge {
    /// Bridge opened for this session; disconnected when the session ends.
    Owned(Arc<dyn BrokerBridge>),
    /// Bridge shared by every session; left alone when the session ends.
    Shared(Arc<dyn BrokerBridge>),
}

impl SessionBridge {
    /// The underlying bridge.
    #[must_use]
    pub fn bridge(&self) -> &Arc<dyn BrokerBridge> {
        match self {
            Self::Owned(bridge) | Self::Shared(bridge) => bridge,
        }
    }

    /// Whether the session owns the bridge.
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }
}

impl fmt::Debug for SessionBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_owned() { "Owned" } else { "Shared" };
        f.debug_tuple(kind).field(&self.bridge().client_id()).finish()
    }
}

/// One client WebSocket connection.
#[derive(Debug)]
pub struct ClientSession {
    /// Unique session identifier.
    id: Uuid,
    /// Remote address, when known.
    peer: Option<SocketAddr>,
    /// When the session was created.
    connected_at: DateTime<Utc>,
    /// Broker bridge used by this session.
    bridge: SessionBridge,
}

impl ClientSession {
    /// Create a new client session.
    #[must_use]
    pub fn new(peer: Option<SocketAddr>, bridge: SessionBridge) -> Self {
        Self::with_id(Uuid::new_v4(), peer, bridge)
    }

    /// Create a session with a known identifier.
    #[must_use]
    pub fn with_id(id: Uuid, peer: Option<SocketAddr>, bridge: SessionBridge) -> Self {
        Self {
            id,
            peer,
            connected_at: Utc::now(),
            bridge,
        }
    }

    /// Get the session ID.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Get the remote address.
    #[must_use]
    pub const fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Get when the session was created.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Get the session's broker bridge.
    #[must_use]
    pub const fn bridge(&self) -> &SessionBridge {
        &self.bridge
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed the connection.
    PeerClosed,
    /// Nothing was received within the read timeout.
    ReadTimeout,
    /// Reading from the WebSocket failed.
    ReadError(String),
    /// The peer sent a frame over the size limit.
    MessageTooLarge {
        /// Frame size in bytes.
        size: usize,
        /// Configured limit in bytes.
        limit: usize,
    },
    /// The broker connection was lost.
    BrokerLost(String),
    /// The session's outbound queue was full.
    QueueOverflow,
    /// The session's outbound queue was closed and drained.
    QueueClosed,
    /// A frame could not be written within the write timeout.
    WriteTimeout,
    /// Writing to the WebSocket failed.
    WriteError(String),
    /// The other pump already ended the session.
    Cancelled,
}

impl SessionEnd {
    /// Whether the session ended because something went wrong.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        !matches!(
            self,
            Self::PeerClosed | Self::ReadTimeout | Self::QueueClosed | Self::Cancelled
        )
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed connection"),
            Self::ReadTimeout => f.write_str("read timeout"),
            Self::ReadError(e) => write!(f, "read error: {e}"),
            Self::MessageTooLarge { size, limit } => {
                write!(f, "message of {size} bytes exceeds limit of {limit} bytes")
            }
            Self::BrokerLost(e) => write!(f, "broker connection lost: {e}"),
            Self::QueueOverflow => f.write_str("outbound queue overflow"),
            Self::QueueClosed => f.write_str("outbound queue closed"),
            Self::WriteTimeout => f.write_str("write timeout"),
            Self::WriteError(e) => write!(f, "write error: {e}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Get the size of a WebSocket message in bytes.
#[must_use]
pub fn ws_message_size(ws_msg: &WsMessage) -> usize {
    match ws_msg {
        WsMessage::Text(text) => text.len(),
        WsMessage::Binary(data) => data.len(),
        WsMessage::Ping(data) | WsMessage::Pong(data) => data.len(),
        WsMessage::Close(frame) => {
            frame.as_ref().map_or(0, |f| f.reason.len() + 2) // 2 bytes for close code
        }
        WsMessage::Frame(frame) => frame.len(),
    }
}

/// Check if a WebSocket message size is within the allowed limits.
///
/// # Errors
///
/// Returns `ServerError::MessageTooLarge` if the message exceeds the configured limit.
pub fn validate_message_size(ws_msg: &WsMessage, config: &WebSocketConfig) -> ServerResult<()> {
    let size = ws_message_size(ws_msg);
    if config.is_message_size_valid(size) {
        Ok(())
    } else {
        Err(ServerError::MessageTooLarge {
            size,
            limit: config.max_message_size,
        })
    }
}

/// Turn a WebSocket message into a command line.
///
/// Text frames and valid UTF-8 binary frames yield a normalized line;
/// control frames yield `None`.
///
/// # Errors
///
/// Returns `ServerError::ConnectionClosed` for a close frame.
pub fn process_ws_message(ws_msg: &WsMessage) -> ServerResult<Option<String>> {
    match ws_msg {
        WsMessage::Text(text) => Ok(Some(normalize_frame(text))),
        WsMessage::Binary(data) => match std::str::from_utf8(data) {
            Ok(text) => Ok(Some(normalize_frame(text))),
            Err(_) => {
                debug!(bytes = data.len(), "ignoring non-UTF-8 binary frame");
                Ok(None)
            }
        },
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => Ok(None),
        WsMessage::Close(_) => {
            debug!("Received close frame");
            Err(ServerError::ConnectionClosed)
        }
    }
}

/// Size-check a WebSocket message, then turn it into a command line.
///
/// # Errors
///
/// Returns `ServerError::MessageTooLarge` if the message exceeds the configured limit.
pub fn process_ws_message_with_limits(
    ws_msg: &WsMessage,
    config: &WebSocketConfig,
) -> ServerResult<Option<String>> {
    validate_message_size(ws_msg, config)?;
    process_ws_message(ws_msg)
}

/// Join queued payloads into one frame body separated by newlines.
#[must_use]
pub fn coalesce(first: String, rest: Vec<String>) -> String {
    if rest.is_empty() {
        return first;
    }
    let mut body = first;
    for payload in rest {
        body.push('\n');
        body.push_str(&payload);
    }
    body
}

/// Runs the end-of-session actions exactly once.
struct SessionCleanup {
    session_id: Uuid,
    hub: HubHandle,
    queue: OutboundQueue,
    bridge: SessionBridge,
    shutdown: CancellationToken,
    reason: OnceLock<SessionEnd>,
}

impl SessionCleanup {
    async fn run(&self, end: &SessionEnd) {
        if self.reason.set(end.clone()).is_err() {
            return;
        }

        if let Err(e) = self.hub.unregister(self.session_id).await {
            debug!(session_id = %self.session_id, error = %e, "unregister skipped");
        }
        self.queue.close();
        self.shutdown.cancel();

        if let SessionBridge::Owned(bridge) = &self.bridge {
            if let Err(e) = bridge.disconnect().await {
                warn!(session_id = %self.session_id, error = %e, "broker disconnect failed");
            }
        }

        if end.is_failure() {
            warn!(session_id = %self.session_id, reason = %end, "Session ended");
        } else {
            info!(session_id = %self.session_id, reason = %end, "Session ended");
        }
    }

    fn reason(&self) -> Option<&SessionEnd> {
        self.reason.get()
    }
}

/// Run a session until either pump stops.
///
/// The session must already be registered with the hub under its id, with
/// `queue` as its outbound queue. On return the session has been
/// unregistered, its queue closed and an owned bridge disconnected.
///
/// Returns the reason the session ended.
pub async fn run_session<S>(
    ws_stream: S,
    session: ClientSession,
    queue: OutboundQueue,
    mut outbound: OutboundReceiver,
    hub: HubHandle,
    config: WebSocketConfig,
) -> SessionEnd
where
    S: Stream<Item = Result<WsMessage, WsError>> + Sink<WsMessage> + Unpin + Send + 'static,
    <S as Sink<WsMessage>>::Error: fmt::Display + Send,
{
    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let session_id = session.id();
    let bridge = Arc::clone(session.bridge().bridge());
    let shutdown = CancellationToken::new();

    info!(
        session_id = %session_id,
        peer = ?session.peer(),
        client_id = bridge.client_id(),
        "Starting session handler"
    );

    let cleanup = Arc::new(SessionCleanup {
        session_id,
        hub,
        queue: queue.clone(),
        bridge: session.bridge().clone(),
        shutdown: shutdown.clone(),
        reason: OnceLock::new(),
    });

    let read_cleanup = Arc::clone(&cleanup);
    let read_task = tokio::spawn(async move {
        let end = inbound_pump(
            &mut ws_stream,
            bridge.as_ref(),
            &queue,
            &config,
            &shutdown,
            session_id,
        )
        .await;
        read_cleanup.run(&end).await;
        end
    });

    let write_cleanup = Arc::clone(&cleanup);
    let write_task = tokio::spawn(async move {
        let end = outbound_pump(&mut ws_sink, &mut outbound, &config, session_id).await;
        write_cleanup.run(&end).await;
        end
    });

    let (read_result, write_result) = tokio::join!(read_task, write_task);
    let read_end = read_result.unwrap_or_else(|e| SessionEnd::ReadError(e.to_string()));
    let write_end = write_result.unwrap_or_else(|e| SessionEnd::WriteError(e.to_string()));

    // A panicked pump never ran the cleanup itself.
    cleanup.run(&read_end).await;
    debug!(session_id = %session_id, read = %read_end, write = %write_end, "pumps stopped");

    cleanup.reason().cloned().unwrap_or(read_end)
}

/// Classify a read error. Frames over the protocol limit are rejected by
/// the WebSocket layer before they reach the size check.
fn read_failure(err: WsError) -> SessionEnd {
    match err {
        WsError::Capacity(CapacityError::MessageTooLong { size, max_size }) => {
            SessionEnd::MessageTooLarge {
                size,
                limit: max_size,
            }
        }
        other => SessionEnd::ReadError(other.to_string()),
    }
}

async fn inbound_pump<R>(
    stream: &mut R,
    bridge: &dyn BrokerBridge,
    queue: &OutboundQueue,
    config: &WebSocketConfig,
    shutdown: &CancellationToken,
    session_id: Uuid,
) -> SessionEnd
where
    R: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    loop {
        let read = tokio::select! {
            biased;
            () = shutdown.cancelled() => return SessionEnd::Cancelled,
            read = timeout(config.read_timeout, stream.next()) => read,
        };

        let ws_msg = match read {
            Err(_) => return SessionEnd::ReadTimeout,
            Ok(None) => return SessionEnd::PeerClosed,
            Ok(Some(Err(e))) => return read_failure(e),
            Ok(Some(Ok(msg))) => msg,
        };

        let line = match process_ws_message_with_limits(&ws_msg, config) {
            Ok(Some(line)) => line,
            Ok(None) => continue,
            Err(ServerError::MessageTooLarge { size, limit }) => {
                return SessionEnd::MessageTooLarge { size, limit };
            }
            Err(_) => return SessionEnd::PeerClosed,
        };

        debug!(session_id = %session_id, line = %line, "command received");

        let (reply, fatal) = match handle_line(&line, bridge).await {
            Ok(reply) => (reply, None),
            Err(e) if e.is_connection_lost() => {
                let reason = e.to_string();
                (Reply::Error(reason.clone()), Some(SessionEnd::BrokerLost(reason)))
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "broker request failed");
                (Reply::Error(e.to_string()), None)
            }
        };

        match queue.try_enqueue(reply.to_string()) {
            Ok(()) => {}
            Err(EnqueueError::Full) => return SessionEnd::QueueOverflow,
            Err(EnqueueError::Closed) => return fatal.unwrap_or(SessionEnd::QueueClosed),
        }

        if let Some(end) = fatal {
            return end;
        }
    }
}

async fn outbound_pump<K>(
    sink: &mut K,
    outbound: &mut OutboundReceiver,
    config: &WebSocketConfig,
    session_id: Uuid,
) -> SessionEnd
where
    K: Sink<WsMessage> + Unpin,
    K::Error: fmt::Display,
{
    let ping_every = config.ping_interval();
    let mut ticker = interval_at(Instant::now() + ping_every, ping_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            item = outbound.recv() => match item {
                Some(first) => WsMessage::Text(coalesce(first, outbound.drain_ready())),
                None => {
                    if let Err(end) = write_frame(sink, WsMessage::Close(None), config.write_timeout).await {
                        debug!(session_id = %session_id, reason = %end, "close frame not sent");
                    }
                    return SessionEnd::QueueClosed;
                }
            },
            _ = ticker.tick() => WsMessage::Ping(Vec::new()),
        };

        if let Err(end) = write_frame(sink, frame, config.write_timeout).await {
            return end;
        }
    }
}

async fn write_frame<K>(sink: &mut K, frame: WsMessage, limit: Duration) -> Result<(), SessionEnd>
where
    K: Sink<WsMessage> + Unpin,
    K::Error: fmt::Display,
{
    match timeout(limit, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SessionEnd::WriteError(e.to_string())),
        Err(_) => Err(SessionEnd::WriteTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;
    use crate::queue::outbound_queue;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use crate::server::open_session_bridge;
    use wsmq_broker::{BrokerConnector, InboundMessage, MemoryBroker};

    struct Harness {
        broker: MemoryBroker,
        hub: HubHandle,
        session_id: Uuid,
        client_id: String,
        queue: OutboundQueue,
        client: WebSocketStream<DuplexStream>,
        task: tokio::task::JoinHandle<SessionEnd>,
    }

    async fn start_session(config: WebSocketConfig, preload: &[&str]) -> Harness {
        start_session_with_buffer(config, preload, 64 * 1024).await
    }

    /// Start a session whose client side of the socket buffers at most
    /// `buffer` bytes in each direction.
    async fn start_session_with_buffer(
        config: WebSocketConfig,
        preload: &[&str],
        buffer: usize,
    ) -> Harness {
        let broker = MemoryBroker::new();
        let (hub, hub_handle) = Hub::new(16);
        tokio::spawn(hub.run());

        let (queue, outbound) = outbound_queue(config.outbound_capacity);
        for payload in preload {
            queue.try_enqueue(*payload).unwrap();
        }

        let bridge = open_session_bridge(&broker, &queue).await.unwrap();
        let client_id = bridge.client_id().to_string();

        let (server_io, client_io) = tokio::io::duplex(buffer);
        let server_ws = WebSocketStream::from_raw_socket(
            server_io,
            Role::Server,
            Some(config.protocol_config()),
        )
        .await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

        let session = ClientSession::new(None, SessionBridge::Owned(bridge));
        let session_id = session.id();
        hub_handle.register(session_id, queue.clone()).await.unwrap();

        let task = tokio::spawn(run_session(
            server_ws,
            session,
            queue.clone(),
            outbound,
            hub_handle.clone(),
            config,
        ));

        Harness {
            broker,
            hub: hub_handle,
            session_id,
            client_id,
            queue,
            client,
            task,
        }
    }

    async fn next_text(client: &mut WebSocketStream<DuplexStream>) -> String {
        loop {
            match client.next().await {
                Some(Ok(WsMessage::Text(text))) => return text,
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    async fn expect_close(client: &mut WebSocketStream<DuplexStream>) {
        loop {
            match client.next().await {
                Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    }

    // ==================== Message Size Tests ====================

    #[test]
    fn test_ws_message_size() {
        assert_eq!(ws_message_size(&WsMessage::Text("hello".to_string())), 5);
        assert_eq!(ws_message_size(&WsMessage::Binary(vec![0; 10])), 10);
        assert_eq!(ws_message_size(&WsMessage::Ping(vec![1, 2])), 2);
        assert_eq!(ws_message_size(&WsMessage::Close(None)), 0);
    }

    #[test]
    fn test_validate_message_size_at_limit() {
        let config = WebSocketConfig::new();
        let msg = WsMessage::Text("x".repeat(512));
        assert!(validate_message_size(&msg, &config).is_ok());
    }

    #[test]
    fn test_validate_message_size_over_limit() {
        let config = WebSocketConfig::new();
        let msg = WsMessage::Text("x".repeat(513));
        let err = validate_message_size(&msg, &config).unwrap_err();
        assert!(matches!(
            err,
            ServerError::MessageTooLarge {
                size: 513,
                limit: 512
            }
        ));
    }

    // ==================== Frame Processing Tests ====================

    #[test]
    fn test_process_text_normalizes_newlines() {
        let msg = WsMessage::Text("pub t\nhello\n".to_string());
        assert_eq!(
            process_ws_message(&msg).unwrap().as_deref(),
            Some("pub t hello")
        );
    }

    #[test]
    fn test_process_binary_utf8() {
        let msg = WsMessage::Binary(b"sub a/b".to_vec());
        assert_eq!(process_ws_message(&msg).unwrap().as_deref(), Some("sub a/b"));
    }

    #[test]
    fn test_process_binary_invalid_utf8_ignored() {
        let msg = WsMessage::Binary(vec![0xff, 0xfe]);
        assert_eq!(process_ws_message(&msg).unwrap(), None);
    }

    #[test]
    fn test_process_control_frames() {
        assert_eq!(process_ws_message(&WsMessage::Ping(vec![])).unwrap(), None);
        assert_eq!(process_ws_message(&WsMessage::Pong(vec![])).unwrap(), None);
        assert!(matches!(
            process_ws_message(&WsMessage::Close(None)),
            Err(ServerError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_coalesce() {
        assert_eq!(coalesce("a".to_string(), vec![]), "a");
        assert_eq!(
            coalesce("a".to_string(), vec!["b".to_string(), "c".to_string()]),
            "a\nb\nc"
        );
    }

    proptest::proptest! {
        #[test]
        fn coalesce_splits_back_into_parts(parts in proptest::collection::vec("[a-z ]{0,8}", 1..6)) {
            let first = parts[0].clone();
            let joined = coalesce(first, parts[1..].to_vec());
            let split: Vec<&str> = joined.split('\n').collect();
            proptest::prop_assert_eq!(split, parts.iter().map(String::as_str).collect::<Vec<_>>());
        }
    }

    // ==================== SessionEnd Tests ====================

    #[test]
    fn test_session_end_failure_classification() {
        assert!(!SessionEnd::PeerClosed.is_failure());
        assert!(!SessionEnd::ReadTimeout.is_failure());
        assert!(SessionEnd::QueueOverflow.is_failure());
        assert!(SessionEnd::WriteTimeout.is_failure());
        assert!(SessionEnd::BrokerLost("x".to_string()).is_failure());
    }

    #[test]
    fn test_session_end_display() {
        let end = SessionEnd::MessageTooLarge {
            size: 600,
            limit: 512,
        };
        assert_eq!(end.to_string(), "message of 600 bytes exceeds limit of 512 bytes");
    }

    // ==================== ClientSession Tests ====================

    #[tokio::test]
    async fn test_client_session_accessors() {
        let broker = MemoryBroker::new();
        let bridge = broker
            .connect("id".to_string(), Arc::new(|_msg: InboundMessage| {}))
            .await
            .unwrap();
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        let session = ClientSession::new(Some(peer), SessionBridge::Shared(bridge));

        assert_eq!(session.peer(), Some(peer));
        assert!(!session.bridge().is_owned());
        assert!(session.connected_at() <= Utc::now());
        assert_ne!(session.id(), Uuid::nil());
    }

    // ==================== Session Loop Tests ====================

    #[tokio::test]
    async fn test_publish_reply_round_trip() {
        let mut h = start_session(WebSocketConfig::new(), &[]).await;

        h.client
            .send(WsMessage::Text("pub topic1 hello world".to_string()))
            .await
            .unwrap();

        assert_eq!(next_text(&mut h.client).await, "pub topic1 hello world");
        assert_eq!(h.broker.published()[0].payload, b"hello world");
    }

    #[tokio::test]
    async fn test_subscription_delivers_rcv_frames() {
        let mut h = start_session(WebSocketConfig::new(), &[]).await;

        h.client
            .send(WsMessage::Text("sub sensors/+".to_string()))
            .await
            .unwrap();
        assert_eq!(next_text(&mut h.client).await, "info subscribed to sensors/+");

        h.broker.publish_external("sensors/temp", b"21.5");
        assert_eq!(next_text(&mut h.client).await, "rcv sensors/temp 21.5");
    }

    #[tokio::test]
    async fn test_queued_payloads_are_coalesced() {
        let mut h = start_session(WebSocketConfig::new(), &["a", "b", "c"]).await;
        assert_eq!(next_text(&mut h.client).await, "a\nb\nc");
    }

    #[tokio::test]
    async fn test_broker_error_keeps_session_alive() {
        let mut h = start_session(WebSocketConfig::new(), &[]).await;
        h.broker.reject_subscriptions(true);

        h.client
            .send(WsMessage::Text("sub a".to_string()))
            .await
            .unwrap();
        let reply = next_text(&mut h.client).await;
        assert!(reply.starts_with("err subscribe to 'a' failed"));

        h.client
            .send(WsMessage::Text("frobnicate".to_string()))
            .await
            .unwrap();
        assert_eq!(next_text(&mut h.client).await, "err unrecognized command");
        assert!(h.hub.contains(h.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_oversized_frame_ends_session() {
        let mut h = start_session(WebSocketConfig::new(), &[]).await;

        h.client
            .send(WsMessage::Text(format!("pub t {}", "x".repeat(600))))
            .await
            .unwrap();
        expect_close(&mut h.client).await;

        let end = h.task.await.unwrap();
        assert!(matches!(end, SessionEnd::MessageTooLarge { limit: 512, .. }));
        assert!(h.broker.published().is_empty());
    }

    #[test]
    fn test_capacity_error_maps_to_message_too_large() {
        let err = WsError::Capacity(CapacityError::MessageTooLong {
            size: 600,
            max_size: 512,
        });
        assert_eq!(
            read_failure(err),
            SessionEnd::MessageTooLarge {
                size: 600,
                limit: 512
            }
        );
        assert!(matches!(
            read_failure(WsError::ConnectionClosed),
            SessionEnd::ReadError(_)
        ));
    }

    // ==================== Overflow Tests ====================

    #[tokio::test]
    async fn test_delivery_overflow_evicts_session() {
        let config = WebSocketConfig::new().with_outbound_capacity(2);
        let mut h = start_session_with_buffer(config, &[], 64).await;

        h.client
            .send(WsMessage::Text("sub t".to_string()))
            .await
            .unwrap();
        assert_eq!(next_text(&mut h.client).await, "info subscribed to t");

        // No await in between: the pumps cannot drain the queue.
        for i in 0..5 {
            h.broker.publish_external("t", format!("m{i}").as_bytes());
        }
        assert!(h.queue.is_closed());

        expect_close(&mut h.client).await;
        let end = h.task.await.unwrap();

        assert_eq!(end, SessionEnd::QueueClosed);
        assert!(!h.hub.contains(h.session_id).await.unwrap());
        assert_eq!(h.broker.disconnect_calls(&h.client_id), 1);
        assert!(h.broker.connected_clients().is_empty());
    }

    #[tokio::test]
    async fn test_reply_overflow_ends_session() {
        let config = WebSocketConfig::new()
            .with_outbound_capacity(1)
            .with_write_timeout(Duration::from_millis(500));
        let mut h = start_session_with_buffer(config, &[], 32).await;

        // Park the writer on a frame the client never reads, then fill the queue.
        h.queue.try_enqueue("x".repeat(256)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.queue.try_enqueue("filler").unwrap();

        h.client
            .send(WsMessage::Text("pub t a".to_string()))
            .await
            .unwrap();

        let end = h.task.await.unwrap();

        assert_eq!(end, SessionEnd::QueueOverflow);
        assert!(h.queue.is_closed());
        assert!(!h.hub.contains(h.session_id).await.unwrap());
        assert_eq!(h.broker.disconnect_calls(&h.client_id), 1);
    }

    #[tokio::test]
    async fn test_peer_close_runs_cleanup_once() {
        let mut h = start_session(WebSocketConfig::new(), &[]).await;

        h.client.close(None).await.unwrap();
        let end = h.task.await.unwrap();

        assert_eq!(end, SessionEnd::PeerClosed);
        assert!(!h.hub.contains(h.session_id).await.unwrap());
        assert_eq!(h.broker.disconnect_calls(&h.client_id), 1);
    }

    #[tokio::test]
    async fn test_lost_broker_connection_ends_session() {
        let mut h = start_session(WebSocketConfig::new(), &[]).await;
        h.broker.drop_connection(&h.client_id);

        h.client
            .send(WsMessage::Text("pub t x".to_string()))
            .await
            .unwrap();
        let reply = next_text(&mut h.client).await;
        assert!(reply.starts_with("err publish to 't' failed"));
        expect_close(&mut h.client).await;

        let end = h.task.await.unwrap();
        assert!(matches!(end, SessionEnd::BrokerLost(_)));
    }

    #[tokio::test]
    async fn test_hub_unregister_closes_session() {
        let mut h = start_session(WebSocketConfig::new(), &[]).await;

        h.hub.unregister(h.session_id).await.unwrap();
        expect_close(&mut h.client).await;

        assert_eq!(h.task.await.unwrap(), SessionEnd::QueueClosed);
        assert_eq!(h.broker.disconnect_calls(&h.client_id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_ends_session() {
        let config = WebSocketConfig::new().with_read_timeout(Duration::from_secs(60));
        let h = start_session(config, &[]).await;

        let end = h.task.await.unwrap();

        assert_eq!(end, SessionEnd::ReadTimeout);
        assert!(!h.hub.contains(h.session_id).await.unwrap());
        assert_eq!(h.broker.disconnect_calls(&h.client_id), 1);
        assert!(h.broker.connected_clients().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_ping_before_timeout() {
        let config = WebSocketConfig::new().with_read_timeout(Duration::from_secs(10));
        let mut h = start_session(config, &[]).await;

        let start = Instant::now();
        match h.client.next().await {
            Some(Ok(WsMessage::Ping(_))) => {}
            other => panic!("expected ping, got {other:?}"),
        }
        assert!(start.elapsed() >= Duration::from_secs(9));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
