//! Command handlers.

use tracing::debug;
use wsmq_broker::{BrokerBridge, BrokerResult};
use wsmq_proto::{Command, Reply};

/// Execute one normalized command line against a broker bridge.
///
/// Parsing never fails; broker failures are returned so the caller can
/// decide whether the session survives them.
pub async fn handle_line(line: &str, bridge: &dyn BrokerBridge) -> BrokerResult<Reply> {
    match Command::parse(line) {
        Command::Subscribe { topic } => {
            bridge.subscribe(&topic).await?;
            debug!(client_id = bridge.client_id(), topic = %topic, "subscribe routed");
            Ok(Reply::Subscribed { topic })
        }
        Command::Publish { topic, payload } => {
            bridge.publish(&topic, payload.as_bytes()).await?;
            debug!(client_id = bridge.client_id(), topic = %topic, "publish routed");
            Ok(Reply::Published { topic, payload })
        }
        Command::PublishMissingPayload => Ok(Reply::PublishMessageNotFound),
        Command::Unrecognized { verb } => {
            debug!(verb = %verb, "unrecognized command");
            Ok(Reply::Unrecognized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wsmq_broker::{BrokerConnector, InboundMessage, MemoryBroker, PublishRecord};

    async fn connect(broker: &MemoryBroker) -> Arc<dyn BrokerBridge> {
        broker
            .connect("wsmq_test".to_string(), Arc::new(|_msg: InboundMessage| {}))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_publish_with_spaces_in_payload() {
        let broker = MemoryBroker::new();
        let bridge = connect(&broker).await;

        let reply = handle_line("pub topic1 hello world", bridge.as_ref())
            .await
            .unwrap();

        assert_eq!(reply.to_string(), "pub topic1 hello world");
        assert_eq!(
            broker.published(),
            vec![PublishRecord {
                client_id: "wsmq_test".to_string(),
                topic: "topic1".to_string(),
                payload: b"hello world".to_vec(),
            }]
        );
    }

    #[tokio::test]
    async fn test_publish_without_payload() {
        let broker = MemoryBroker::new();
        let bridge = connect(&broker).await;

        let reply = handle_line("pub topic1", bridge.as_ref()).await.unwrap();

        assert_eq!(reply.to_string(), "publish message not found");
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe() {
        let broker = MemoryBroker::new();
        let bridge = connect(&broker).await;

        let reply = handle_line("sub sensors/+", bridge.as_ref()).await.unwrap();

        assert_eq!(reply.to_string(), "info subscribed to sensors/+");
        assert_eq!(broker.subscriptions_of("wsmq_test"), vec!["sensors/+"]);
    }

    #[tokio::test]
    async fn test_unrecognized_makes_no_broker_call() {
        let broker = MemoryBroker::new();
        let bridge = connect(&broker).await;

        let reply = handle_line("frobnicate", bridge.as_ref()).await.unwrap();

        assert_eq!(reply.to_string(), "err unrecognized command");
        assert!(broker.published().is_empty());
        assert!(broker.subscriptions_of("wsmq_test").is_empty());
    }

    #[tokio::test]
    async fn test_rejected_subscribe_is_returned() {
        let broker = MemoryBroker::new();
        broker.reject_subscriptions(true);
        let bridge = connect(&broker).await;

        let err = handle_line("sub sensors/+", bridge.as_ref())
            .await
            .unwrap_err();

        assert!(!err.is_connection_lost());
    }

    #[tokio::test]
    async fn test_lost_connection_is_returned() {
        let broker = MemoryBroker::new();
        let bridge = connect(&broker).await;
        broker.drop_connection("wsmq_test");

        let err = handle_line("pub t x", bridge.as_ref()).await.unwrap_err();
        assert!(err.is_connection_lost());
    }
}
