//! In-memory history store.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{HistoryRecord, HistoryStore, Page, Result, StoreError};

/// History kept in a vector; insertion order is the vector order.
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: RwLock<Vec<HistoryRecord>>,
    fail_on_insert: RwLock<bool>,
    fail_on_query: RwLock<bool>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_insert(&self, fail: bool) {
        *self.fail_on_insert.write().await = fail;
    }

    pub async fn set_fail_on_query(&self, fail: bool) {
        *self.fail_on_query.write().await = fail;
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn insert(&self, record: &HistoryRecord) -> Result<()> {
        if *self.fail_on_insert.read().await {
            return Err(StoreError::Unavailable("insert disabled".to_string()));
        }
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn query(&self, page: Page) -> Result<Vec<HistoryRecord>> {
        if *self.fail_on_query.read().await {
            return Err(StoreError::Unavailable("query disabled".to_string()));
        }
        let skip = usize::try_from(page.skip).unwrap_or(usize::MAX);
        let limit = usize::try_from(page.limit).unwrap_or(usize::MAX);

        Ok(self
            .records
            .read()
            .await
            .iter()
            .skip(skip)
            .take(limit)
            .cloned()
            .collect())
    }
}
