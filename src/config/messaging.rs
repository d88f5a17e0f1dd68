//! Messaging configuration.

use serde::Deserialize;

use crate::event::Encoding;
use crate::topology::VIEWED_EXCHANGE;

/// Exchange and wire settings shared by the producer and both consumers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Fanout exchange carrying view events.
    pub exchange: String,
    /// Payload encoding used when publishing.
    pub encoding: Encoding,
    /// Unacked deliveries allowed per consumer.
    pub prefetch: u16,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            exchange: VIEWED_EXCHANGE.to_string(),
            encoding: Encoding::default(),
            prefetch: 1,
        }
    }
}
