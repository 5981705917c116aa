//! Ingestor: bridges the pull-only source into the push-based queue
//!
//! On a fixed cadence, fetch up to N records and publish the batch as one
//! queue message. The ingestor holds no state beyond its schedule and does
//! no validation — queue contents stay the authoritative, replayable raw
//! feed.

use crate::error::ExponentialBackoff;
use crate::queue::SqliteQueue;
use crate::source::UserSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;

pub struct Ingestor {
    source: Arc<dyn UserSource>,
    queue: SqliteQueue,
    topic: String,
    partitions: u32,
    poll_interval: Duration,
    /// Ticks round-robin the target partition, so assignment is
    /// deterministic across restarts.
    tick_seq: u64,
}

impl Ingestor {
    pub fn new(
        source: Arc<dyn UserSource>,
        queue: SqliteQueue,
        topic: impl Into<String>,
        partitions: u32,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            queue,
            topic: topic.into(),
            partitions,
            poll_interval,
            tick_seq: 0,
        }
    }

    /// Poll-and-publish until the shutdown signal flips. Cancellation
    /// between ticks needs no cleanup — the ingestor is stateless.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "🚀 Ingestor started (topic: {}, every {}s)",
            self.topic,
            self.poll_interval.as_secs()
        );

        let mut timer = interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("⏹ Ingestor stopped");
                        return;
                    }
                }
            }
        }
    }

    /// One scheduled tick: fetch a batch, publish it if non-empty.
    ///
    /// Fetch failures are recoverable and retried on the next tick, never
    /// immediately. Publish failures retry with bounded backoff; on
    /// exhaustion this tick's batch is dropped — the documented
    /// at-least-once gap, logged loudly rather than hidden.
    pub async fn tick(&mut self) {
        let partition = (self.tick_seq % self.partitions as u64) as u32;
        self.tick_seq += 1;

        let batch = match self.source.fetch_batch().await {
            Ok(batch) => batch,
            Err(e) => {
                log::warn!("⚠️ Source fetch failed, retrying next tick: {}", e);
                return;
            }
        };

        if batch.is_empty() {
            log::debug!("Source returned empty batch, nothing to publish");
            return;
        }

        let payload = match serde_json::to_vec(&batch) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("❌ Failed to serialize batch: {}", e);
                return;
            }
        };

        let mut backoff = ExponentialBackoff::for_sink_writes();
        loop {
            match self.queue.publish(&self.topic, partition, &payload) {
                Ok(offset) => {
                    log::info!(
                        "📨 Published {} records to {}[{}] at offset {}",
                        batch.len(),
                        self.topic,
                        partition,
                        offset
                    );
                    return;
                }
                Err(e) => {
                    log::error!("❌ Queue publish failed: {}", e);
                    if backoff.sleep().await.is_err() {
                        log::error!(
                            "❌ Publish retries exhausted, dropping batch of {} records",
                            batch.len()
                        );
                        return;
                    }
                }
            }
        }
    }
}
