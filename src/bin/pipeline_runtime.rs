//! Pipeline runtime
//!
//! Orchestrates the full ingestion + aggregation pipeline:
//! - Opens the durable queue and both stores
//! - Spawns the ingestor task (source poll → queue publish)
//! - Spawns one stream-processor worker per partition
//! - On CTRL+C, signals shutdown and waits for workers to drain
//!
//! Usage:
//!   cargo run --release --bin pipeline_runtime
//!
//! Environment variables: see `PipelineConfig::from_env`.

use dotenv::dotenv;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use userflow::config::PipelineConfig;
use userflow::ingestor::Ingestor;
use userflow::processor::PartitionWorker;
use userflow::queue::SqliteQueue;
use userflow::source::RandomUserClient;
use userflow::store::{SqliteAggregateStore, SqliteDeadLetterSink, SqliteRawStore};
use userflow::USER_TOPIC;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 userflow pipeline runtime");

    let config = PipelineConfig::from_env()?;

    info!("✅ Configuration loaded");
    info!("   ├─ Source: {}", config.source_url);
    info!("   ├─ Poll interval: {}s", config.poll_interval_seconds);
    info!("   ├─ Batch size limit: {}", config.batch_size_limit);
    info!("   ├─ Queue: {}", config.queue_bootstrap_address);
    info!("   ├─ Partitions: {}", config.queue_partitions);
    info!("   ├─ Raw store: {}", config.raw_store_endpoint);
    info!("   └─ Aggregate store: {}", config.aggregate_store_endpoint);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Ingestor: explicit source + queue instances, no globals
    let source = Arc::new(RandomUserClient::new(
        config.source_url.clone(),
        config.batch_size_limit,
    )?);
    let ingest_queue = SqliteQueue::open(&config.queue_bootstrap_address)?;
    let mut ingestor = Ingestor::new(
        source,
        ingest_queue,
        USER_TOPIC,
        config.queue_partitions,
        Duration::from_secs(config.poll_interval_seconds),
    );

    let ingestor_shutdown = shutdown_rx.clone();
    let ingestor_handle = tokio::spawn(async move {
        ingestor.run(ingestor_shutdown).await;
    });
    info!("✅ Ingestor task spawned");

    // One worker per partition, each with its own connections
    let mut worker_handles = Vec::new();
    for partition in 0..config.queue_partitions {
        let queue = SqliteQueue::open(&config.queue_bootstrap_address)?;
        let raw_store = SqliteRawStore::open(&config.raw_store_endpoint)?;
        let dead_letters = SqliteDeadLetterSink::open(&config.raw_store_endpoint)?;
        let aggregate_store = SqliteAggregateStore::open(&config.aggregate_store_endpoint)?;

        let mut worker = PartitionWorker::new(
            USER_TOPIC,
            partition,
            queue,
            raw_store,
            dead_letters,
            aggregate_store,
            config.fetch_max_messages,
            Duration::from_millis(config.consume_idle_ms),
            shutdown_rx.clone(),
        );

        worker_handles.push(tokio::spawn(async move {
            if let Err(e) = worker.run().await {
                error!("❌ Worker partition {} stopped with error: {}", partition, e);
            }
        }));
    }
    info!("✅ {} stream-processor worker(s) spawned", config.queue_partitions);
    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("⚠️ Received CTRL+C, draining..."),
        Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
    }

    // Flip the shutdown signal; workers finish their in-flight message,
    // persist checkpoints, and exit
    let _ = shutdown_tx.send(true);

    let _ = ingestor_handle.await;
    for handle in worker_handles {
        let _ = handle.await;
    }

    info!("✅ Pipeline runtime stopped");
    Ok(())
}
