//! Long-running consumer loop for one bound queue.
//!
//! ```text
//! Connecting -> Consuming -> Processing -> (ack) -> Consuming ...
//!                                \-> (handler failed) -> session closed, reconnect
//! ```
//!
//! Each message is processed, then acknowledged, before the next one is
//! pulled. Acknowledgment is always the last step: a crash between the side
//! effect and the ack redelivers the message instead of losing it.
//!
//! Malformed payloads are rejected without requeue (discarded) so a poison
//! message cannot cycle forever. Handler failures abandon the delivery and
//! close the session, which hands the message back to the broker for
//! redelivery to this or another instance.

use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::bus::{Broker, DeliveryHandle, Subscription};
use crate::event::ViewEvent;
use crate::storage::StoreError;


const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Errors a handler can report for one event.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Failed(String),
}

/// Consumer-specific side effect applied to each event.
pub trait EventHandler: Send + Sync {
    /// Apply the side effect. The returned future must resolve only once the
    /// effect is durable; the delivery is acknowledged right after.
    fn handle(&self, event: Arc<ViewEvent>) -> BoxFuture<'static, Result<(), HandlerError>>;
}

/// Observable lifecycle of a consumer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Opening a subscription (initially, or after a session ended).
    Connecting,
    /// Waiting for the next delivery.
    Consuming,
    /// Running the handler for one delivery.
    Processing,
    /// Stopped by shutdown. Terminal.
    Closed,
}

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Acked,
    Discarded,
    /// Left unacked; the session must end so the broker requeues it.
    Abandoned,
}

/// Why a session ended.
enum SessionEnd {
    Shutdown,
    Reconnect,
}

/// Pulls from one queue and drives a handler with ack-after-effect.
pub struct ConsumerLoop {
    broker: Arc<dyn Broker>,
    queue: String,
    prefetch: u16,
    handler: Arc<dyn EventHandler>,
    backoff: ExponentialBuilder,
    state: watch::Sender<ConsumerState>,
}

impl ConsumerLoop {
    pub fn new(
        broker: Arc<dyn Broker>,
        queue: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Connecting);
        Self {
            broker,
            queue: queue.into(),
            prefetch: 1,
            handler,
            backoff: ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(100))
                .with_max_delay(MAX_RECONNECT_DELAY)
                .with_jitter(),
            state,
        }
    }

    /// Maximum unacked deliveries outstanding on the subscription.
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    /// Override the reconnect backoff.
    pub fn with_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.backoff = backoff;
        self
    }

    /// Watch the loop's state transitions.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> ConsumerState {
        let span = tracing::info_span!("consumer", queue = %self.queue);
        self.run_sessions(shutdown).instrument(span).await
    }

    /// Spawn the loop as a dedicated task.
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<ConsumerState> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run_sessions(self, shutdown: CancellationToken) -> ConsumerState {
        let builder = self.backoff.without_max_times();
        let mut backoff = builder.build();

        loop {
            self.set_state(ConsumerState::Connecting);

            let subscribed = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.broker.subscribe(&self.queue, self.prefetch) => result,
            };

            match subscribed {
                Ok(subscription) => {
                    info!(prefetch = self.prefetch, "Consumer connected, processing messages");

                    let (end, acked) = self.session(subscription, &shutdown).await;
                    // Only a completed delivery proves the handler is healthy again.
                    if acked > 0 {
                        backoff = builder.build();
                    }
                    if let SessionEnd::Shutdown = end {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to set up consumer");
                }
            }

            let delay = backoff.next().unwrap_or(MAX_RECONNECT_DELAY);
            debug!(backoff_ms = %delay.as_millis(), "Reconnecting after backoff");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConsumerState::Closed);
        info!("Consumer closed");
        ConsumerState::Closed
    }

    /// Consume from one subscription until it ends, fails, or shutdown.
    /// Also returns how many deliveries were acked along the way.
    async fn session(
        &self,
        mut subscription: Box<dyn Subscription>,
        shutdown: &CancellationToken,
    ) -> (SessionEnd, usize) {
        let mut acked = 0;
        let end = loop {
            self.set_state(ConsumerState::Consuming);

            let next = tokio::select! {
                _ = shutdown.cancelled() => break SessionEnd::Shutdown,
                next = subscription.next_delivery() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    error!(error = %e, "Consumer delivery error, will reconnect");
                    break SessionEnd::Reconnect;
                }
                None => {
                    info!("Consumer stream ended, reconnecting...");
                    break SessionEnd::Reconnect;
                }
            };

            self.set_state(ConsumerState::Processing);

            // Shutdown mid-processing drops the delivery unacked; closing the
            // session below returns it to the queue.
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => {
                    warn!("Shutdown during processing, abandoning in-flight delivery");
                    break SessionEnd::Shutdown;
                }
                outcome = self.process(delivery) => outcome,
            };

            match outcome {
                Outcome::Acked => acked += 1,
                Outcome::Discarded => {}
                Outcome::Abandoned => break SessionEnd::Reconnect,
            }
        };

        subscription.close().await;
        (end, acked)
    }

    /// Decode, handle, then acknowledge one delivery.
    async fn process(&self, delivery: DeliveryHandle) -> Outcome {
        let delivery_tag = delivery.delivery_tag;

        let event =
            match ViewEvent::decode(&delivery.payload, delivery.content_type.as_deref()) {
                Ok(event) => Arc::new(event),
                Err(e) => {
                    error!(
                        error = %e,
                        delivery_tag,
                        "Discarding malformed message"
                    );
                    if let Err(e) = delivery.reject().await {
                        error!(error = %e, delivery_tag, "Failed to reject message");
                    }
                    return Outcome::Discarded;
                }
            };

        debug!(
            delivery_tag,
            redelivered = delivery.redelivered,
            video_path = %event.video_path,
            "Received view event"
        );

        if let Err(e) = self.handler.handle(Arc::clone(&event)).await {
            error!(
                error = %e,
                delivery_tag,
                video_path = %event.video_path,
                "Handler failed, leaving message unacknowledged"
            );
            return Outcome::Abandoned;
        }

        match delivery.ack().await {
            Ok(()) => Outcome::Acked,
            Err(e) => {
                // The effect is done but the broker will redeliver it.
                error!(error = %e, delivery_tag, "Failed to ack message");
                Outcome::Abandoned
            }
        }
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }
}
