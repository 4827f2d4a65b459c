//! Test helpers for E2E tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
};
use wsmq_broker::MemoryBroker;
use wsmq_gateway::{GatewayServer, HubHandle, ServerConfig};

/// Default test timeout.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Route gateway logs through the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Test gateway that manages its own lifecycle.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub broker: MemoryBroker,
    pub hub: HubHandle,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestGateway {
    /// Start a per-session gateway with default settings.
    pub async fn start() -> Self {
        Self::start_with(|config| config).await
    }

    /// Start a gateway whose configuration is adjusted by `configure`.
    pub async fn start_with(configure: impl FnOnce(ServerConfig) -> ServerConfig) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = configure(ServerConfig::new(addr).with_max_connections(100));
        let broker = MemoryBroker::new();
        let mut server = GatewayServer::new(config, Arc::new(broker.clone()));
        let hub = server.hub();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = server.serve_listener(listener, shutdown).await {
                tracing::error!(error = %e, "Server error");
            }
        });

        Self {
            addr,
            broker,
            hub,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Get the WebSocket URL for this gateway.
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.hub.session_count().await.unwrap()
    }

    /// Wait until the hub reports `expected` live sessions.
    pub async fn wait_for_sessions(&self, expected: usize) {
        let hub = self.hub.clone();
        wait_until(move || {
            let hub = hub.clone();
            async move { hub.session_count().await.unwrap() == expected }
        })
        .await;
    }

    /// Shutdown the gateway.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = timeout(Duration::from_secs(2), handle).await;
        }
    }
}

/// Poll `condition` until it holds, failing the test after [`TEST_TIMEOUT`].
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    timeout(TEST_TIMEOUT, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// WebSocket client speaking the text command protocol.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pending: Vec<String>,
}

impl TestClient {
    /// Connect to a gateway.
    pub async fn connect(url: &str) -> Result<Self, String> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| format!("Failed to connect: {e}"))?;
        Ok(Self {
            ws,
            pending: Vec::new(),
        })
    }

    /// Send one text frame.
    pub async fn send(&mut self, text: &str) {
        self.ws
            .send(WsMessage::Text(text.to_string()))
            .await
            .unwrap();
    }

    /// Send one binary frame.
    pub async fn send_binary(&mut self, data: &[u8]) {
        self.ws.send(WsMessage::Binary(data.to_vec())).await.unwrap();
    }

    /// Receive the next line. Frames carrying several `\n`-separated
    /// payloads are split; control frames are skipped.
    pub async fn recv_line(&mut self) -> Result<String, String> {
        loop {
            if !self.pending.is_empty() {
                return Ok(self.pending.remove(0));
            }

            let msg = timeout(TEST_TIMEOUT, self.ws.next())
                .await
                .map_err(|_| "Timeout waiting for message".to_string())?
                .ok_or("Connection closed")?
                .map_err(|e| e.to_string())?;

            match msg {
                WsMessage::Text(text) => {
                    self.pending.extend(text.split('\n').map(str::to_string));
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) => {}
                WsMessage::Close(_) => return Err("Connection closed".to_string()),
                other => return Err(format!("Unexpected frame: {other:?}")),
            }
        }
    }

    /// Receive `count` lines in arrival order.
    pub async fn recv_lines(&mut self, count: usize) -> Vec<String> {
        let mut lines = Vec::with_capacity(count);
        for _ in 0..count {
            lines.push(self.recv_line().await.unwrap());
        }
        lines
    }

    /// Send a command and return the first line received afterwards.
    pub async fn request(&mut self, text: &str) -> String {
        self.send(text).await;
        self.recv_line().await.unwrap()
    }

    /// Wait for the server to close the connection. Remaining text frames
    /// are discarded.
    pub async fn expect_closed(&mut self) {
        timeout(TEST_TIMEOUT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => return,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await
        .expect("server did not close the connection");
    }

    /// Close the connection from the client side.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
