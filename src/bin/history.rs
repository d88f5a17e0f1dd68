//! history: history recorder and query endpoint
//!
//! Consumes view events from `historyQueue`, appends each one to the
//! MongoDB `history` collection, and serves `GET /history?skip=&limit=`.
//!
//! ## Configuration
//! - PORT: HTTP listen port (required)
//! - RABBIT: AMQP URI (required)
//! - DBHOST: MongoDB URI (required)
//! - DBNAME: database name (required)

use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use flixtube::bus::{AmqpBroker, Binding, Broker};
use flixtube::config::Config;
use flixtube::consumer::ConsumerLoop;
use flixtube::handlers::HistoryRecorder;
use flixtube::http::{self, history, HistoryState};
use flixtube::process::{close_after, exit_with, StartupError};
use flixtube::storage::{HistoryStore, MongoHistoryStore};
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
    let (dbhost, dbname) = config.require_store()?;

    info!(port, queue = %config.history.queue, "Starting history service");

    let store: Arc<dyn HistoryStore> = Arc::new(
        MongoHistoryStore::connect(dbhost, dbname, &config.history.collection).await?,
    );
    close_after(with_store(&config, port, rabbit, Arc::clone(&store)), store.close()).await?;

    info!("history service stopped");
    Ok(())
}

async fn with_store(
    config: &Config,
    port: u16,
    rabbit: &str,
    store: Arc<dyn HistoryStore>,
) -> Result<(), StartupError> {
    let broker: Arc<dyn Broker> = Arc::new(AmqpBroker::connect(rabbit).await?);
    close_after(
        with_broker(config, port, Arc::clone(&broker), store),
        broker.close(),
    )
    .await
}

async fn with_broker(
    config: &Config,
    port: u16,
    broker: Arc<dyn Broker>,
    store: Arc<dyn HistoryStore>,
) -> Result<(), StartupError> {
    let topology = TopologyManager::new(Arc::clone(&broker));
    topology.ensure_exchange(&config.messaging.exchange).await?;
    topology
        .ensure(&Binding::durable(
            config.messaging.exchange.clone(),
            config.history.queue.clone(),
        ))
        .await?;

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let consumer = ConsumerLoop::new(
        broker,
        config.history.queue.clone(),
        Arc::new(HistoryRecorder::new(Arc::clone(&store))),
    )
    .with_prefetch(config.messaging.prefetch)
    .spawn(shutdown.clone());

    let state = HistoryState {
        store,
        max_limit: config.history.max_limit,
    };
    let served = http::serve(
        http::service_router(history::router(state)),
        port,
        shutdown.clone(),
    )
    .await;
    shutdown.cancel();

    if let Err(e) = consumer.await {
        error!(error = %e, "Consumer task failed");
    }
    Ok(served?)
}
