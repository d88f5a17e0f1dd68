//! recommendations: view-event consumer
//!
//! Consumes view events from `recommendationsQueue` and keeps per-video
//! view counts. Only the health endpoint is served over HTTP.
//!
//! ## Configuration
//! - PORT: HTTP listen port (required)
//! - RABBIT: AMQP URI (required)

use std::process::ExitCode;
use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use flixtube::bus::{AmqpBroker, Binding, Broker};
use flixtube::config::Config;
use flixtube::consumer::ConsumerLoop;
use flixtube::handlers::RecommendationsHandler;
use flixtube::http;
use flixtube::process::{close_after, exit_with, StartupError};
use flixtube::topology::TopologyManager;
use flixtube::utils::bootstrap::{cancel_on_signal, init_tracing, parse_config_path};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    exit_with(run().await)
}

async fn run() -> Result<(), StartupError> {
    let config = Config::load(parse_config_path().as_deref())?;
    let port = config.require_port()?;
    let rabbit = config.require_rabbit()?;

    info!(
        port,
        queue = %config.recommendations.queue,
        "Starting recommendations service"
    );

    let broker: Arc<dyn Broker> = Arc::new(AmqpBroker::connect(rabbit).await?);
    close_after(
        with_broker(&config, port, Arc::clone(&broker)),
        broker.close(),
    )
    .await?;

    info!("recommendations service stopped");
    Ok(())
}

async fn with_broker(
    config: &Config,
    port: u16,
    broker: Arc<dyn Broker>,
) -> Result<(), StartupError> {
    let topology = TopologyManager::new(Arc::clone(&broker));
    topology.ensure_exchange(&config.messaging.exchange).await?;
    topology
        .ensure(&Binding::durable(
            config.messaging.exchange.clone(),
            config.recommendations.queue.clone(),
        ))
        .await?;

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let handler = RecommendationsHandler::new();
    let consumer = ConsumerLoop::new(
        broker,
        config.recommendations.queue.clone(),
        Arc::new(handler.clone()),
    )
    .with_prefetch(config.messaging.prefetch)
    .spawn(shutdown.clone());

    let served = http::serve(http::service_router(Router::new()), port, shutdown.clone()).await;
    shutdown.cancel();

    if let Err(e) = consumer.await {
        error!(error = %e, "Consumer task failed");
    }
    for (video_path, views) in handler.most_viewed(5).await {
        info!(%video_path, views, "Most viewed");
    }
    Ok(served?)
}
