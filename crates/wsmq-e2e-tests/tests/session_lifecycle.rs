//! End-to-end tests for session teardown: timeouts, oversize frames,
//! broker loss, and connection limits.

mod helpers;

use std::time::Duration;

use helpers::{TestClient, TestGateway, wait_until};
use wsmq_broker::MemoryBroker;
use wsmq_gateway::WebSocketConfig;

async fn single_client_id(broker: &MemoryBroker) -> String {
    let watched = broker.clone();
    wait_until(move || {
        let watched = watched.clone();
        async move { watched.connected_clients().len() == 1 }
    })
    .await;
    broker.connected_clients().remove(0)
}

async fn wait_for_disconnect(broker: &MemoryBroker, client_id: &str) {
    let watched = broker.clone();
    let id = client_id.to_string();
    wait_until(move || {
        let watched = watched.clone();
        let id = id.clone();
        async move { watched.disconnect_calls(&id) > 0 }
    })
    .await;
}

#[tokio::test]
async fn test_client_close_cleans_up_session() {
    let gateway = TestGateway::start().await;
    let client = TestClient::connect(&gateway.ws_url()).await.unwrap();
    gateway.wait_for_sessions(1).await;
    let id = single_client_id(&gateway.broker).await;

    client.close().await;

    gateway.wait_for_sessions(0).await;
    wait_for_disconnect(&gateway.broker, &id).await;
    assert_eq!(gateway.broker.disconnect_calls(&id), 1);
    assert!(gateway.broker.connected_clients().is_empty());

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_read_timeout_closes_session_once() {
    let websocket = WebSocketConfig::new().with_read_timeout(Duration::from_millis(200));
    let gateway = TestGateway::start_with(|config| config.with_websocket_config(websocket)).await;
    let mut client = TestClient::connect(&gateway.ws_url()).await.unwrap();
    gateway.wait_for_sessions(1).await;
    let id = single_client_id(&gateway.broker).await;

    // Stay silent; the server gives up after the read deadline.
    tokio::time::sleep(Duration::from_millis(400)).await;
    client.expect_closed().await;

    gateway.wait_for_sessions(0).await;
    wait_for_disconnect(&gateway.broker, &id).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(gateway.broker.disconnect_calls(&id), 1);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_oversized_frame_closes_session() {
    let gateway = TestGateway::start().await;
    let mut client = TestClient::connect(&gateway.ws_url()).await.unwrap();
    gateway.wait_for_sessions(1).await;

    let payload = "x".repeat(600);
    client.send(&format!("pub big {payload}")).await;
    client.expect_closed().await;

    gateway.wait_for_sessions(0).await;
    assert!(gateway.broker.published().is_empty());

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_frame_at_limit_is_accepted() {
    let gateway = TestGateway::start().await;
    let mut client = TestClient::connect(&gateway.ws_url()).await.unwrap();

    // "pub t " is 6 bytes; the whole frame is exactly 512.
    let payload = "y".repeat(512 - 6);
    let reply = client.request(&format!("pub t {payload}")).await;
    assert_eq!(reply, format!("pub t {payload}"));

    client.close().await;
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_broker_connection_loss_ends_session() {
    let gateway = TestGateway::start().await;
    let mut client = TestClient::connect(&gateway.ws_url()).await.unwrap();
    gateway.wait_for_sessions(1).await;
    let id = single_client_id(&gateway.broker).await;

    assert!(gateway.broker.drop_connection(&id));

    client.send("sub after/drop").await;
    let reply = client.recv_line().await.unwrap();
    assert!(reply.starts_with("err "), "unexpected reply: {reply}");
    client.expect_closed().await;

    gateway.wait_for_sessions(0).await;
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_refused_broker_rejects_client() {
    let gateway = TestGateway::start().await;
    gateway.broker.refuse_connections(true);

    // The upgrade succeeds but the session is closed before registering.
    if let Ok(mut client) = TestClient::connect(&gateway.ws_url()).await {
        client.expect_closed().await;
    }
    assert_eq!(gateway.session_count().await, 0);

    gateway.broker.refuse_connections(false);
    let mut client = TestClient::connect(&gateway.ws_url()).await.unwrap();
    assert_eq!(client.request("pub ok yes").await, "pub ok yes");

    client.close().await;
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_max_connections_enforced() {
    let gateway = TestGateway::start_with(|config| config.with_max_connections(1)).await;
    let mut first = TestClient::connect(&gateway.ws_url()).await.unwrap();
    gateway.wait_for_sessions(1).await;

    // Over the limit the TCP stream is dropped before the upgrade.
    match TestClient::connect(&gateway.ws_url()).await {
        Err(_) => {}
        Ok(mut second) => second.expect_closed().await,
    }
    assert_eq!(gateway.session_count().await, 1);

    // The first session is unaffected.
    assert_eq!(first.request("pub still ok").await, "pub still ok");

    first.close().await;
    gateway.wait_for_sessions(0).await;

    // The slot frees once the connection task has finished.
    let mut replacement = tokio::time::timeout(helpers::TEST_TIMEOUT, async {
        loop {
            if let Ok(client) = TestClient::connect(&gateway.ws_url()).await {
                return client;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(replacement.request("pub next ok").await, "pub next ok");

    replacement.close().await;
    gateway.shutdown().await;
}
