//! Recommendations consumer.
//!
//! Stands in for a recommendation engine: it logs every view and keeps a
//! running count per video, which is the only derived model it maintains.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tracing::info;

use crate::consumer::{EventHandler, HandlerError};
use crate::event::ViewEvent;

/// Counts views per video path.
#[derive(Clone, Default)]
pub struct RecommendationsHandler {
    views: Arc<RwLock<HashMap<String, u64>>>,
}

impl RecommendationsHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Views seen so far for `video_path`.
    pub async fn view_count(&self, video_path: &str) -> u64 {
        self.views
            .read()
            .await
            .get(video_path)
            .copied()
            .unwrap_or(0)
    }

    /// Most viewed paths first, ties broken by path.
    pub async fn most_viewed(&self, n: usize) -> Vec<(String, u64)> {
        let mut ranked: Vec<(String, u64)> = self
            .views
            .read()
            .await
            .iter()
            .map(|(path, count)| (path.clone(), *count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }
}

impl EventHandler for RecommendationsHandler {
    fn handle(&self, event: Arc<ViewEvent>) -> BoxFuture<'static, Result<(), HandlerError>> {
        let views = Arc::clone(&self.views);
        Box::pin(async move {
            let mut views = views.write().await;
            let count = views.entry(event.video_path.clone()).or_insert(0);
            *count += 1;
            info!(
                video_path = %event.video_path,
                views = *count,
                "Received viewed message"
            );
            Ok(())
        })
    }
}
