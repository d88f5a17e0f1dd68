//! video-streaming: content delivery endpoint
//!
//! Serves `GET /video` and publishes a view event to the `Viewed` fanout
//! exchange each time the file has been fully streamed.
//!
//! ## Configuration
//! - PORT: HTTP listen port (required)
//! - RABBIT: AMQP URI (required)
//! - FLIXTUBE__VIDEO__PATH: file to stream

use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use flixtube::bus::{AmqpBroker, Broker};
use flixtube::config::Config;
use flixtube::http::{self, video, VideoState};
use flixtube::process::{close_after, exit_with, StartupError};
use flixtube::producer::Producer;
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
        path = %config.video.path.display(),
        "Starting video-streaming service"
    );

    let broker: Arc<dyn Broker> = Arc::new(AmqpBroker::connect(rabbit).await?);
    close_after(
        with_broker(&config, port, Arc::clone(&broker)),
        broker.close(),
    )
    .await?;

    info!("video-streaming service stopped");
    Ok(())
}

async fn with_broker(
    config: &Config,
    port: u16,
    broker: Arc<dyn Broker>,
) -> Result<(), StartupError> {
    TopologyManager::new(Arc::clone(&broker))
        .ensure_exchange(&config.messaging.exchange)
        .await?;

    let producer = Producer::new(
        broker,
        config.messaging.exchange.clone(),
        config.messaging.encoding,
    );
    let state = VideoState::new(config.video.path.clone(), producer);

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let served = http::serve(
        http::service_router(video::router(state)),
        port,
        shutdown.clone(),
    )
    .await;
    shutdown.cancel();

    Ok(served?)
}
