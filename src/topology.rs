//! Broker topology declaration.
//!
//! Every service instance declares the pieces it depends on at startup. All
//! declarations are idempotent, so instances never coordinate: the first one
//! creates the exchange and queue, the rest confirm they exist.

use std::sync::Arc;

use tracing::info;

use crate::bus::{Binding, Broker, Exchange, Result};

/// Conventional name of the fanout exchange carrying view events.
pub const VIEWED_EXCHANGE: &str = "Viewed";
/// Durable queue owned by the history service.
pub const HISTORY_QUEUE: &str = "historyQueue";
/// Durable queue owned by the recommendations service.
pub const RECOMMENDATIONS_QUEUE: &str = "recommendationsQueue";

/// Declares exchanges and bindings on a shared broker handle.
#[derive(Clone)]
pub struct TopologyManager {
    broker: Arc<dyn Broker>,
}

impl TopologyManager {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Ensure the fanout exchange exists. Used by producers, which know
    /// nothing about the queues behind it.
    pub async fn ensure_exchange(&self, exchange: &str) -> Result<()> {
        self.broker
            .declare_exchange(&Exchange::fanout(exchange))
            .await?;
        info!(exchange = %exchange, "Fanout exchange ready");
        Ok(())
    }

    /// Ensure the binding's exchange, queue, and binding exist.
    pub async fn ensure(&self, binding: &Binding) -> Result<()> {
        self.broker
            .declare_exchange(&Exchange::fanout(&binding.exchange))
            .await?;
        self.broker.declare_binding(binding).await?;
        info!(
            exchange = %binding.exchange,
            queue = %binding.queue,
            durable = binding.durable,
            "Consumer binding ready"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusError, ChannelBroker, OutboundMessage};

    fn message() -> OutboundMessage {
        OutboundMessage {
            payload: b"{}".to_vec(),
            content_type: "application/json",
        }
    }

    #[tokio::test]
    async fn test_ensure_declares_exchange_and_queue() {
        let broker = ChannelBroker::new();
        let topology = TopologyManager::new(Arc::new(broker.clone()));

        topology
            .ensure(&Binding::durable(VIEWED_EXCHANGE, HISTORY_QUEUE))
            .await
            .unwrap();

        broker.publish(VIEWED_EXCHANGE, message()).await.unwrap();
        assert_eq!(broker.queue_stats(HISTORY_QUEUE).unwrap().ready, 1);
    }

    #[tokio::test]
    async fn test_ensure_twice_from_independent_instances() {
        let broker = ChannelBroker::new();
        let first = TopologyManager::new(Arc::new(broker.clone()));
        let second = TopologyManager::new(Arc::new(broker.clone()));
        let binding = Binding::durable(VIEWED_EXCHANGE, HISTORY_QUEUE);

        first.ensure(&binding).await.unwrap();
        second.ensure(&binding).await.unwrap();

        broker.publish(VIEWED_EXCHANGE, message()).await.unwrap();
        assert_eq!(broker.queue_stats(HISTORY_QUEUE).unwrap().ready, 1);
    }

    #[tokio::test]
    async fn test_producer_and_consumer_declare_in_any_order() {
        let broker = ChannelBroker::new();
        let topology = TopologyManager::new(Arc::new(broker.clone()));

        topology
            .ensure(&Binding::durable(VIEWED_EXCHANGE, RECOMMENDATIONS_QUEUE))
            .await
            .unwrap();
        topology.ensure_exchange(VIEWED_EXCHANGE).await.unwrap();

        assert!(broker.queue_stats(RECOMMENDATIONS_QUEUE).is_some());
    }

    #[tokio::test]
    async fn test_ensure_fails_on_closed_broker() {
        let broker = ChannelBroker::new();
        broker.close().await;
        let topology = TopologyManager::new(Arc::new(broker));

        let result = topology
            .ensure(&Binding::durable(VIEWED_EXCHANGE, HISTORY_QUEUE))
            .await;
        assert!(matches!(result, Err(BusError::Closed)));
    }
}
