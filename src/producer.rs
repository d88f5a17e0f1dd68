//! Publishes view events to the fanout exchange.

use std::sync::Arc;

use tracing::{debug, error, Instrument};

use crate::bus::{Broker, BusError, OutboundMessage};
use crate::event::{CodecError, Encoding, ViewEvent};

/// Errors returned by [`Producer::publish`].
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Serializes view events and hands them to the exchange.
///
/// The producer publishes once with no routing key and knows nothing about
/// how many consumers are bound.
#[derive(Clone)]
pub struct Producer {
    broker: Arc<dyn Broker>,
    exchange: String,
    encoding: Encoding,
}

impl Producer {
    pub fn new(broker: Arc<dyn Broker>, exchange: impl Into<String>, encoding: Encoding) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
            encoding,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Encode and publish one event.
    pub async fn publish(&self, event: &ViewEvent) -> Result<(), PublishError> {
        let payload = event.encode(self.encoding)?;
        self.broker
            .publish(
                &self.exchange,
                OutboundMessage {
                    payload,
                    content_type: self.encoding.content_type(),
                },
            )
            .await?;

        debug!(
            exchange = %self.exchange,
            video_path = %event.video_path,
            "Published view event"
        );
        Ok(())
    }

    /// Publish in the background, logging failure.
    ///
    /// Used from the content-delivery path: a failed publish never affects
    /// the response that triggered it.
    pub fn publish_detached(&self, event: ViewEvent) -> tokio::task::JoinHandle<()> {
        let producer = self.clone();
        let span = tracing::info_span!("producer.publish", video_path = %event.video_path);
        tokio::spawn(
            async move {
                if let Err(e) = producer.publish(&event).await {
                    error!(error = %e, exchange = %producer.exchange, "Failed to publish view event");
                }
            }
            .instrument(span),
        )
    }
}
