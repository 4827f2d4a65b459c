//! WebSocket gateway server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_tungstenite::accept_async_with_config;
use tracing::{debug, info, warn};
use wsmq_broker::{
    BrokerBridge, BrokerConnector, BrokerResult, InboundMessage, MessageHandler,
    generate_client_id,
};

use crate::config::{BridgeMode, ServerConfig};
use crate::error::{ServerError, ServerResult};
use crate::hub::{Hub, HubHandle};
use crate::queue::{EnqueueError, OutboundQueue, outbound_queue};
use crate::session::{ClientSession, SessionBridge, SessionEnd, run_session};

/// Client id prefix of broker connections opened by the gateway.
pub const SESSION_CLIENT_PREFIX: &str = "wsmq_";

/// Gateway server accepting WebSocket clients and bridging them to the broker.
pub struct GatewayServer {
    /// Server configuration.
    config: Arc<ServerConfig>,
    /// Opens broker connections.
    connector: Arc<dyn BrokerConnector>,
    /// Registry loop, taken when the server starts.
    hub: Option<Hub>,
    /// Handle to the registry loop.
    hub_handle: HubHandle,
    /// One permit per admitted connection, held from accept until the
    /// connection task ends.
    slots: Arc<Semaphore>,
}

impl std::fmt::Debug for GatewayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayServer")
            .field("config", &self.config)
            .field("started", &self.hub.is_none())
            .finish_non_exhaustive()
    }
}

impl GatewayServer {
    /// Create a new gateway server.
    #[must_use]
    pub fn new(config: ServerConfig, connector: Arc<dyn BrokerConnector>) -> Self {
        let (hub, hub_handle) = Hub::new(config.hub_capacity);
        let slots = Arc::new(Semaphore::new(
            config.max_connections.min(Semaphore::MAX_PERMITS),
        ));
        Self {
            config: Arc::new(config),
            connector,
            hub: Some(hub),
            hub_handle,
            slots,
        }
    }

    /// Get the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get a handle to the connection registry.
    #[must_use]
    pub fn hub(&self) -> HubHandle {
        self.hub_handle.clone()
    }

    /// Get the number of live sessions.
    ///
    /// Reports zero before the server has started.
    pub async fn session_count(&self) -> usize {
        if self.hub.is_some() {
            return 0;
        }
        self.hub_handle.session_count().await.unwrap_or(0)
    }

    /// Bind `addr` and serve until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails or the shared bridge cannot be set up.
    pub async fn serve<F>(&mut self, addr: SocketAddr, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(addr, e))?;

        self.serve_listener(listener, shutdown).await
    }

    /// Serve connections from an already bound listener until `shutdown`
    /// completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the server was already started or the shared
    /// bridge cannot be set up.
    pub async fn serve_listener<F>(&mut self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let hub = self
            .hub
            .take()
            .ok_or_else(|| ServerError::Internal("server already started".to_string()))?;
        tokio::spawn(hub.run());

        let shared = match self.config.bridge_mode {
            BridgeMode::Shared => Some(self.connect_shared_bridge().await?),
            BridgeMode::PerSession => None,
        };

        let addr = listener.local_addr().ok();
        info!(addr = ?addr, mode = %self.config.bridge_mode, "Gateway server listening");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            self.handle_connection(stream, peer_addr, shared.clone()).await;
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                () = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        if let Some(bridge) = shared {
            if let Err(e) = bridge.disconnect().await {
                warn!(error = %e, "shared bridge disconnect failed");
            }
        }

        info!("Gateway server shutting down");
        Ok(())
    }

    /// Open the shared bridge and subscribe it to the shared topic.
    async fn connect_shared_bridge(&self) -> ServerResult<Arc<dyn BrokerBridge>> {
        let hub = self.hub_handle.clone();
        let handler: MessageHandler = Arc::new(move |msg: InboundMessage| {
            hub.try_broadcast(msg.render());
        });

        let bridge = self
            .connector
            .connect(generate_client_id(SESSION_CLIENT_PREFIX), handler)
            .await?;

        if let Err(e) = bridge.subscribe(&self.config.shared_topic).await {
            let _ = bridge.disconnect().await;
            return Err(e.into());
        }

        info!(
            client_id = bridge.client_id(),
            topic = %self.config.shared_topic,
            "Shared broker bridge ready"
        );
        Ok(bridge)
    }

    /// Handle a new TCP connection.
    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        shared: Option<Arc<dyn BrokerBridge>>,
    ) {
        debug!(peer = %peer_addr, "New connection");

        // Counted from accept, so connections still upgrading hold a slot.
        let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
            warn!(
                peer = %peer_addr,
                max = self.config.max_connections,
                "Connection rejected: max connections reached"
            );
            return;
        };

        let config = Arc::clone(&self.config);
        let connector = Arc::clone(&self.connector);
        let hub = self.hub_handle.clone();

        tokio::spawn(async move {
            match serve_connection(stream, peer_addr, config, connector, hub, shared).await {
                Ok(end) => debug!(peer = %peer_addr, reason = %end, "Connection closed"),
                Err(e) => warn!(peer = %peer_addr, error = %e, "Connection ended with error"),
            }
            drop(permit);
        });
    }
}

/// Open a broker bridge whose deliveries go to `queue`.
///
/// A delivery that finds the queue full closes it, which evicts the session.
///
/// # Errors
///
/// Returns an error if the broker connection cannot be established.
pub async fn open_session_bridge(
    connector: &dyn BrokerConnector,
    queue: &OutboundQueue,
) -> BrokerResult<Arc<dyn BrokerBridge>> {
    let delivery = queue.clone();
    let handler: MessageHandler = Arc::new(move |msg: InboundMessage| {
        if delivery.try_enqueue(msg.render()) == Err(EnqueueError::Full) {
            warn!(topic = %msg.topic, "outbound queue full, evicting session");
            delivery.close();
        }
    });

    connector
        .connect(generate_client_id(SESSION_CLIENT_PREFIX), handler)
        .await
}

/// Upgrade, attach a broker bridge, register, and run one session.
async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<ServerConfig>,
    connector: Arc<dyn BrokerConnector>,
    hub: HubHandle,
    shared: Option<Arc<dyn BrokerBridge>>,
) -> ServerResult<SessionEnd> {
    let handshake = accept_async_with_config(stream, Some(config.websocket.protocol_config()));
    let mut ws_stream = timeout(config.connection_timeout, handshake)
        .await
        .map_err(|_| ServerError::WebSocket("handshake timed out".to_string()))??;

    info!(peer = %peer_addr, "WebSocket connection established");

    let (queue, outbound) = outbound_queue(config.websocket.outbound_capacity);
    let bridge = match shared {
        Some(bridge) => SessionBridge::Shared(bridge),
        None => match open_session_bridge(connector.as_ref(), &queue).await {
            Ok(bridge) => SessionBridge::Owned(bridge),
            Err(e) => {
                let _ = ws_stream.close(None).await;
                return Err(e.into());
            }
        },
    };

    let session = ClientSession::new(Some(peer_addr), bridge);
    if let Err(e) = hub.register(session.id(), queue.clone()).await {
        if let SessionBridge::Owned(bridge) = session.bridge() {
            let _ = bridge.disconnect().await;
        }
        let _ = ws_stream.close(None).await;
        return Err(e);
    }

    Ok(run_session(ws_stream, session, queue, outbound, hub, config.websocket).await)
}
