//! Test utilities and mock handlers.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Notify;

use crate::consumer::{EventHandler, HandlerError};
use crate::event::ViewEvent;

/// Records every event it handles.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    seen: Arc<Mutex<Vec<ViewEvent>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Vec<ViewEvent> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or_default()
    }
}

impl EventHandler for RecordingHandler {
    fn handle(&self, event: Arc<ViewEvent>) -> BoxFuture<'static, Result<(), HandlerError>> {
        let seen = Arc::clone(&self.seen);
        Box::pin(async move {
            seen.lock().unwrap().push((*event).clone());
            Ok(())
        })
    }
}

/// Fails the first `failures` calls, then records like [`RecordingHandler`].
#[derive(Clone)]
pub struct FlakyHandler {
    failures_left: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
    inner: RecordingHandler,
}

impl FlakyHandler {
    pub fn new(failures: usize) -> Self {
        Self {
            failures_left: Arc::new(AtomicUsize::new(failures)),
            calls: Arc::new(AtomicUsize::new(0)),
            inner: RecordingHandler::new(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn succeeded(&self) -> usize {
        self.inner.count()
    }

    /// Fail the next `failures` calls again.
    pub fn fail_next(&self, failures: usize) {
        self.failures_left.store(failures, Ordering::SeqCst);
    }
}

impl EventHandler for FlakyHandler {
    fn handle(&self, event: Arc<ViewEvent>) -> BoxFuture<'static, Result<(), HandlerError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Box::pin(async { Err(HandlerError::Failed("injected failure".to_string())) });
        }
        self.inner.handle(event)
    }
}

/// Blocks inside the side effect until released.
#[derive(Clone, Default)]
pub struct GatedHandler {
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
    inner: RecordingHandler,
}

impl GatedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.inner.count()
    }
}

impl EventHandler for GatedHandler {
    fn handle(&self, event: Arc<ViewEvent>) -> BoxFuture<'static, Result<(), HandlerError>> {
        let started = Arc::clone(&self.started);
        let release = Arc::clone(&self.release);
        let inner = self.inner.clone();
        Box::pin(async move {
            started.notify_one();
            release.notified().await;
            inner.handle(event).await
        })
    }
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
