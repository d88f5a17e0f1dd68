//! `GET /video` and the publish-on-complete response body.
//!
//! A view is counted only when every byte of the file has been handed to
//! the response body. Requests that fail, or responses the client abandons
//! part way, publish nothing.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::Stream;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use crate::event::ViewEvent;
use crate::producer::Producer;

/// Shared state for the video route.
#[derive(Clone)]
pub struct VideoState {
    pub path: Arc<PathBuf>,
    pub producer: Producer,
}

impl VideoState {
    pub fn new(path: impl Into<PathBuf>, producer: Producer) -> Self {
        Self {
            path: Arc::new(path.into()),
            producer,
        }
    }
}

pub fn router(state: VideoState) -> Router {
    Router::new()
        .route("/video", get(stream_video))
        .with_state(state)
}

async fn stream_video(State(state): State<VideoState>) -> Response {
    let path = state.path.as_path();

    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "Video file not found");
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to open video file");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let length = match file.metadata().await {
        Ok(metadata) if metadata.is_file() => metadata.len(),
        Ok(_) => {
            error!(path = %path.display(), "Video path is not a regular file");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to stat video file");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let event = ViewEvent::new(path.display().to_string());
    // Never send more than the advertised length, even if the file grows.
    let chunks = ReaderStream::new(file.take(length));
    let body = PublishOnComplete::new(chunks, length, state.producer.clone(), event);

    info!(path = %path.display(), length, "Streaming video");

    (
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// Wraps a body stream and publishes a view event once `remaining` bytes
/// have been yielded.
struct PublishOnComplete<S> {
    inner: S,
    remaining: u64,
    pending: Option<(Producer, ViewEvent)>,
}

impl<S> PublishOnComplete<S> {
    fn new(inner: S, length: u64, producer: Producer, event: ViewEvent) -> Self {
        let mut stream = Self {
            inner,
            remaining: length,
            pending: Some((producer, event)),
        };
        // An empty file is complete before any chunk is polled.
        if length == 0 {
            stream.complete();
        }
        stream
    }

    fn complete(&mut self) {
        if let Some((producer, event)) = self.pending.take() {
            debug!(video_path = %event.video_path, "Video fully streamed");
            producer.publish_detached(event);
        }
    }

    fn abandon(&mut self, reason: &str) {
        if let Some((_, event)) = self.pending.take() {
            warn!(
                video_path = %event.video_path,
                remaining = self.remaining,
                reason,
                "Video stream incomplete, not publishing"
            );
        }
    }
}

impl<S> Stream for PublishOnComplete<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = ready!(Pin::new(&mut self.inner).poll_next(cx));

        match &item {
            Some(Ok(chunk)) => {
                self.remaining = self.remaining.saturating_sub(chunk.len() as u64);
                if self.remaining == 0 {
                    self.complete();
                }
            }
            Some(Err(e)) => {
                let reason = e.to_string();
                self.abandon(&reason);
            }
            None => {
                if self.remaining > 0 {
                    self.abandon("file shorter than advertised");
                }
            }
        }

        Poll::Ready(item)
    }
}

impl<S> Drop for PublishOnComplete<S> {
    fn drop(&mut self) {
        if self.pending.is_some() {
            debug!(remaining = self.remaining, "Client went away before the video finished");
        }
    }
}
