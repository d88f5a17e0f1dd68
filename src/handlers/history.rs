//! History recorder.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, Instrument};

use crate::consumer::{EventHandler, HandlerError};
use crate::event::ViewEvent;
use crate::storage::{HistoryRecord, HistoryStore};

/// Inserts one history record per view event.
///
/// Duplicated deliveries produce duplicated records; the read model does not
/// deduplicate.
pub struct HistoryRecorder {
    store: Arc<dyn HistoryStore>,
}

impl HistoryRecorder {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }
}

impl EventHandler for HistoryRecorder {
    fn handle(&self, event: Arc<ViewEvent>) -> BoxFuture<'static, Result<(), HandlerError>> {
        let store = Arc::clone(&self.store);
        let span = tracing::debug_span!("history.record", video_path = %event.video_path);

        Box::pin(
            async move {
                store.insert(&HistoryRecord::from(event.as_ref())).await?;
                debug!("Recorded view");
                Ok(())
            }
            .instrument(span),
        )
    }
}
