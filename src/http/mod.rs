//! HTTP surface of the three services.
//!
//! Endpoints:
//! - `GET /video`: stream the configured media file (video-streaming)
//! - `GET /history?skip=&limit=`: page through the history read model (history)
//! - `GET /health`: liveness, on every service

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod history;
pub mod video;

pub use history::HistoryState;
pub use video::VideoState;

/// Add the health route and request tracing to a service's routes.
pub fn service_router(routes: Router) -> Router {
    routes
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
}

/// Bind `0.0.0.0:port` and serve until `shutdown` is cancelled.
///
/// When `port` is 0, the OS assigns an ephemeral port. The actual bound
/// port is always logged so it can be discovered.
pub async fn serve(router: Router, port: u16, shutdown: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    serve_listener(listener, router, shutdown).await
}

/// Serve on an already bound listener until `shutdown` is cancelled.
pub async fn serve_listener(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let actual_port = listener.local_addr()?.port();
    info!(port = actual_port, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn health() -> StatusCode {
    StatusCode::OK
}
