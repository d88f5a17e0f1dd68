//! Message broker abstraction.
//!
//! This module contains:
//! - `Broker` trait: topology declaration, publishing, and subscriptions
//! - `Subscription` trait: a pull-based stream of deliveries from one queue
//! - `DeliveryHandle`: one in-flight message awaiting acknowledgment
//! - Implementations: AMQP (RabbitMQ), in-process channel broker

use async_trait::async_trait;
use futures::future::BoxFuture;

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod channel;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;
pub use channel::{ChannelBroker, QueueStats};

// ============================================================================
// Errors
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Topology declaration failed: {0}")]
    Topology(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Acknowledgment failed: {0}")]
    Ack(String),

    #[error("Broker closed")]
    Closed,
}

// ============================================================================
// Topology types
// ============================================================================

/// A fanout distribution point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub name: String,
    pub durable: bool,
}

impl Exchange {
    /// Durable fanout exchange with the given name.
    pub fn fanout(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
        }
    }
}

/// One consumer's subscription to a fanout exchange.
///
/// Declared once at consumer startup. Redeclaring an identical binding is a
/// no-op on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub exchange: String,
    pub queue: String,
    /// Ignored by fanout exchanges; kept empty by convention.
    pub routing_key: String,
    pub durable: bool,
}

impl Binding {
    /// Durable queue bound to `exchange` with an empty routing key.
    pub fn durable(exchange: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key: String::new(),
            durable: true,
        }
    }
}

/// Message handed to [`Broker::publish`].
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub payload: Vec<u8>,
    pub content_type: &'static str,
}

// ============================================================================
// Deliveries
// ============================================================================

/// Broker-specific acknowledgment channel for a single delivery.
pub trait Acker: Send {
    /// Confirm the delivery; the broker may delete the message.
    fn ack(self: Box<Self>) -> BoxFuture<'static, Result<()>>;

    /// Refuse the delivery without requeueing it.
    fn reject(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// One in-flight message owned by the consumer that received it.
///
/// `ack` and `reject` consume the handle, so a delivery transitions out of
/// the unacked state at most once. Dropping the handle abandons it: the
/// message stays unacked until its subscription closes, after which the
/// broker redelivers it.
pub struct DeliveryHandle {
    pub payload: Vec<u8>,
    pub content_type: Option<String>,
    pub delivery_tag: u64,
    pub redelivered: bool,
    acker: Box<dyn Acker>,
}

impl DeliveryHandle {
    pub fn new(
        payload: Vec<u8>,
        content_type: Option<String>,
        delivery_tag: u64,
        redelivered: bool,
        acker: Box<dyn Acker>,
    ) -> Self {
        Self {
            payload,
            content_type,
            delivery_tag,
            redelivered,
            acker,
        }
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn reject(self) -> Result<()> {
        self.acker.reject().await
    }
}

impl std::fmt::Debug for DeliveryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryHandle")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("content_type", &self.content_type)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

// ============================================================================
// Traits
// ============================================================================

/// A live consumer attached to one queue.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery.
    ///
    /// Returns `None` once the broker has ended the stream (disconnect or
    /// close); the subscription is then dead and a new one must be opened.
    async fn next_delivery(&mut self) -> Option<Result<DeliveryHandle>>;

    /// Close the subscription. Unacknowledged deliveries return to the queue.
    async fn close(self: Box<Self>);
}

/// Interface to the publish/subscribe broker.
///
/// Implementations:
/// - `AmqpBroker`: RabbitMQ via AMQP 0-9-1
/// - `ChannelBroker`: in-process broker for tests and local runs
///
/// A single broker handle is shared by every component of a process and is
/// safe for concurrent use.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a fanout exchange. Idempotent for identical declarations.
    async fn declare_exchange(&self, exchange: &Exchange) -> Result<()>;

    /// Declare the binding's queue and bind it to its exchange.
    /// Idempotent for identical declarations.
    async fn declare_binding(&self, binding: &Binding) -> Result<()>;

    /// Publish one message to an exchange. Fanout exchanges copy it into
    /// every queue bound at this moment.
    async fn publish(&self, exchange: &str, message: OutboundMessage) -> Result<()>;

    /// Start consuming from a queue with at most `prefetch` unacked
    /// deliveries outstanding.
    async fn subscribe(&self, queue: &str, prefetch: u16) -> Result<Box<dyn Subscription>>;

    /// Release the broker connection.
    async fn close(&self);
}
