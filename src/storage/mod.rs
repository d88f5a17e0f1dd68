//! History read model storage.
//!
//! The read model is append-only: one record per consumed view event,
//! duplicates included. Reads return records in insertion order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::event::ViewEvent;

pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongodb;

pub use memory::MemoryHistoryStore;
#[cfg(feature = "mongodb")]
pub use self::mongodb::MongoHistoryStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "mongodb")]
    #[error("MongoDB error: {0}")]
    Mongo(#[from] ::mongodb::error::Error),
}

/// One persisted view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(rename = "videoPath")]
    pub video_path: String,
}

impl From<&ViewEvent> for HistoryRecord {
    fn from(event: &ViewEvent) -> Self {
        Self {
            video_path: event.video_path.clone(),
        }
    }
}

/// Default collection holding history records.
pub const HISTORY_COLLECTION: &str = "history";

/// Default cap on records returned by one query.
pub const DEFAULT_MAX_LIMIT: u64 = 100;

/// Largest `skip` a store is asked for. Mongo encodes it as a signed 64-bit
/// integer; anything past it is beyond the end of any collection anyway.
pub const MAX_SKIP: u64 = i64::MAX as u64;

/// A validated `skip`/`limit` window over the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub skip: u64,
    pub limit: u64,
}

/// Rejection reasons for pagination parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageError {
    #[error("missing query parameter '{0}'")]
    Missing(&'static str),

    #[error("query parameter '{param}' must be a non-negative integer, got '{value}'")]
    Invalid { param: &'static str, value: String },

    #[error("query parameter '{0}' given more than once")]
    Repeated(&'static str),
}

impl Page {
    /// Parse raw query parameters. Both are required; `limit` is clamped to
    /// `max_limit` and `skip` to [`MAX_SKIP`].
    pub fn parse(
        skip: Option<&str>,
        limit: Option<&str>,
        max_limit: u64,
    ) -> std::result::Result<Self, PageError> {
        let skip = parse_param("skip", skip)?;
        let limit = parse_param("limit", limit)?;
        Ok(Self {
            skip: skip.min(MAX_SKIP),
            limit: limit.min(max_limit),
        })
    }
}

fn parse_param(param: &'static str, raw: Option<&str>) -> std::result::Result<u64, PageError> {
    let raw = raw.ok_or(PageError::Missing(param))?;
    raw.trim().parse::<u64>().map_err(|_| PageError::Invalid {
        param,
        value: raw.to_string(),
    })
}

/// Interface for the history read model.
///
/// Implementations:
/// - `MongoHistoryStore`: MongoDB collection
/// - `MemoryHistoryStore`: in-memory, for tests and local runs
///
/// Every call is a single independent operation; no transactions.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one record.
    async fn insert(&self, record: &HistoryRecord) -> Result<()>;

    /// Records `[skip, skip + limit)` in insertion order. A zero limit
    /// returns nothing.
    async fn query(&self, page: Page) -> Result<Vec<HistoryRecord>>;

    /// Release the underlying connection.
    async fn close(&self) {}
}
