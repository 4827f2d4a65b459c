//! Broker traffic monitor.
//!
//! Subscribes a dedicated bridge to a set of filters and writes every
//! delivered message as one `topic:payload` line.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use wsmq_broker::{
    BrokerBridge, BrokerConnector, BrokerError, InboundMessage, MessageHandler,
    generate_client_id,
};

use crate::error::ServerResult;

/// Client id prefix of the monitor's broker connection.
pub const MONITOR_CLIENT_PREFIX: &str = "wsmq_mon_";

/// How often the monitor checks that its broker connection is still up.
const LIVENESS_CHECK: Duration = Duration::from_secs(1);

/// Print broker traffic on `topics` to `writer` until `shutdown` completes.
///
/// Returns the number of lines written.
///
/// # Errors
///
/// Returns an error if the broker connection fails, a subscription is
/// rejected, or writing fails. The bridge is disconnected in every case.
pub async fn run_monitor<W, F>(
    connector: &dyn BrokerConnector,
    topics: &[String],
    shutdown: F,
    writer: &mut W,
) -> ServerResult<usize>
where
    W: AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler: MessageHandler = Arc::new(move |msg: InboundMessage| {
        let _ = tx.send(msg);
    });

    let bridge = connector
        .connect(generate_client_id(MONITOR_CLIENT_PREFIX), handler)
        .await?;

    let result = monitor_loop(bridge.as_ref(), topics, shutdown, &mut rx, writer).await;

    if let Err(e) = bridge.disconnect().await {
        warn!(error = %e, "monitor disconnect failed");
    }
    result
}

async fn monitor_loop<W, F>(
    bridge: &dyn BrokerBridge,
    topics: &[String],
    shutdown: F,
    rx: &mut mpsc::UnboundedReceiver<InboundMessage>,
    writer: &mut W,
) -> ServerResult<usize>
where
    W: AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    for topic in topics {
        bridge.subscribe(topic).await?;
        info!(client_id = bridge.client_id(), topic = %topic, "Monitoring");
    }

    let mut liveness = tokio::time::interval(LIVENESS_CHECK);
    let mut written = 0;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                let line = format!("{}\n", msg.render_monitor_line());
                writer.write_all(line.as_bytes()).await?;
                writer.flush().await?;
                written += 1;
            }
            _ = liveness.tick() => {
                if !bridge.is_connected() {
                    return Err(BrokerError::Connection("monitor connection lost".to_string()).into());
                }
            }
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;
    use tokio::sync::oneshot;
    use wsmq_broker::MemoryBroker;

    async fn wait_for_client(broker: &MemoryBroker) -> String {
        loop {
            if let Some(id) = broker.connected_clients().into_iter().next() {
                if !broker.subscriptions_of(&id).is_empty() {
                    return id;
                }
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_monitor_prints_topic_and_payload() {
        let broker = MemoryBroker::new();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let publisher = broker.clone();
        let driver = tokio::spawn(async move {
            let id = wait_for_client(&publisher).await;
            publisher.publish_external("sensors/temp", b"21.5");
            publisher.publish_external("door", b"open");
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = stop_tx.send(());
            id
        });

        let mut out: Vec<u8> = Vec::new();
        let shutdown = async {
            let _ = stop_rx.await;
        };
        let written = run_monitor(&broker, &["#".to_string()], shutdown, &mut out)
            .await
            .unwrap();

        let id = driver.await.unwrap();
        assert!(id.starts_with(MONITOR_CLIENT_PREFIX));
        assert_eq!(written, 2);
        assert_eq!(String::from_utf8(out).unwrap(), "sensors/temp:21.5\ndoor:open\n");
        assert_eq!(broker.disconnect_calls(&id), 1);
    }

    #[tokio::test]
    async fn test_monitor_rejected_subscription_disconnects() {
        let broker = MemoryBroker::new();
        broker.reject_subscriptions(true);
        let mut out: Vec<u8> = Vec::new();

        let err = run_monitor(&broker, &["#".to_string()], async {}, &mut out)
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::Broker(_)));
        assert_eq!(broker.total_disconnect_calls(), 1);
        assert!(broker.connected_clients().is_empty());
    }

    #[tokio::test]
    async fn test_monitor_refused_connection() {
        let broker = MemoryBroker::new();
        broker.refuse_connections(true);
        let mut out: Vec<u8> = Vec::new();

        let err = run_monitor(&broker, &["#".to_string()], async {}, &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Broker(BrokerError::Connection(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_stops_when_connection_lost() {
        let broker = MemoryBroker::new();
        let dropper = broker.clone();
        tokio::spawn(async move {
            let id = wait_for_client(&dropper).await;
            dropper.drop_connection(&id);
        });

        let mut out: Vec<u8> = Vec::new();
        let err = run_monitor(&broker, &["#".to_string()], std::future::pending(), &mut out)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("monitor connection lost"));
    }
}
