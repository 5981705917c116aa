//! Stream processor: the pipeline's core state machine
//!
//! One `PartitionWorker` per partition, each owning its own stores and its
//! own sequential pipeline. Per message: parse → validate (dead-letter on
//! failure) → transform → raw-store append → aggregate update → atomic
//! {aggregate rows + checkpoint} commit. The checkpoint only advances after
//! the writes are durable, so a crash causes redelivery, never loss.

pub mod aggregate;
pub mod types;
pub mod validate;

use crate::error::ExponentialBackoff;
use crate::queue::{QueueMessage, SqliteQueue};
use crate::store::{DeadLetterEntry, SqliteAggregateStore, SqliteDeadLetterSink, SqliteRawStore};
use self::aggregate::CountryStatsTable;
use self::validate::validate_and_transform;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl ProcessorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorState::Starting => "STARTING",
            ProcessorState::Running => "RUNNING",
            ProcessorState::Draining => "DRAINING",
            ProcessorState::Stopped => "STOPPED",
        }
    }
}

#[derive(Debug)]
pub enum WorkerError {
    Queue(String),
    SinkWrite(String),
    /// Fatal: the worker must stop rather than risk duplicate or lost
    /// processing.
    CheckpointPersist(String),
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerError::Queue(msg) => write!(f, "Queue error: {}", msg),
            WorkerError::SinkWrite(msg) => write!(f, "Sink write error: {}", msg),
            WorkerError::CheckpointPersist(msg) => {
                write!(f, "Checkpoint persist error: {}", msg)
            }
        }
    }
}

impl std::error::Error for WorkerError {}

/// Counters for one processed message, logged at commit time.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageOutcome {
    pub valid: usize,
    pub dead_lettered: usize,
}

pub struct PartitionWorker {
    topic: String,
    partition: u32,
    queue: SqliteQueue,
    raw_store: SqliteRawStore,
    dead_letters: SqliteDeadLetterSink,
    aggregate_store: SqliteAggregateStore,
    stats: CountryStatsTable,
    state: ProcessorState,
    committed_offset: i64,
    /// High-water mark keeping per-partition `ingestion_time` monotonic
    /// non-decreasing even across clock steps
    last_ingestion_time: i64,
    fetch_max: usize,
    idle_wait: Duration,
    shutdown: watch::Receiver<bool>,
}

impl PartitionWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        topic: impl Into<String>,
        partition: u32,
        queue: SqliteQueue,
        raw_store: SqliteRawStore,
        dead_letters: SqliteDeadLetterSink,
        aggregate_store: SqliteAggregateStore,
        fetch_max: usize,
        idle_wait: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            queue,
            raw_store,
            dead_letters,
            aggregate_store,
            stats: CountryStatsTable::new(),
            state: ProcessorState::Starting,
            committed_offset: -1,
            last_ingestion_time: 0,
            fetch_max,
            idle_wait,
            shutdown,
        }
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn committed_offset(&self) -> i64 {
        self.committed_offset
    }

    /// Recover the checkpoint and persisted aggregates, then consume until
    /// shutdown. Returns Ok on clean drain, Err only on fatal conditions.
    pub async fn run(&mut self) -> Result<(), WorkerError> {
        self.start().await?;

        let result = self.consume_loop().await;

        self.state = ProcessorState::Stopped;
        log::info!(
            "⏹ Worker partition {} {} (checkpoint: {})",
            self.partition,
            self.state.as_str(),
            self.committed_offset
        );

        result
    }

    /// STARTING: load the partition checkpoint and seed the in-memory
    /// country table from the persisted rows.
    async fn start(&mut self) -> Result<(), WorkerError> {
        debug_assert_eq!(self.state, ProcessorState::Starting);

        self.committed_offset = self
            .aggregate_store
            .checkpoint(self.partition)
            .map_err(|e| WorkerError::CheckpointPersist(e.to_string()))?
            .unwrap_or(-1);

        let persisted = self
            .aggregate_store
            .scan_all()
            .map_err(|e| WorkerError::SinkWrite(e.to_string()))?;
        self.stats = CountryStatsTable::restore(persisted);

        // Monotonicity of ingestion_time must span restarts: resume the
        // high-water mark from the newest persisted row so a backwards clock
        // step across a restart cannot reorder the raw store.
        self.last_ingestion_time = self
            .raw_store
            .max_ingestion_time()
            .map_err(|e| WorkerError::SinkWrite(e.to_string()))?
            .unwrap_or(0);

        self.state = ProcessorState::Running;
        log::info!(
            "🚀 Worker partition {} {} (resuming after offset {}, {} countries restored)",
            self.partition,
            self.state.as_str(),
            self.committed_offset,
            self.stats.len()
        );

        Ok(())
    }

    /// RUNNING: fetch → process → commit, until the shutdown signal flips.
    async fn consume_loop(&mut self) -> Result<(), WorkerError> {
        loop {
            if *self.shutdown.borrow() {
                self.state = ProcessorState::Draining;
                log::info!(
                    "🔄 Worker partition {} {} — no in-flight message, nothing to flush",
                    self.partition,
                    self.state.as_str()
                );
                return Ok(());
            }

            // Queue unavailability is recoverable: block and re-poll rather
            // than giving up the partition
            let messages = match self.queue.fetch(
                &self.topic,
                self.partition,
                self.committed_offset,
                self.fetch_max,
            ) {
                Ok(messages) => messages,
                Err(e) => {
                    log::warn!(
                        "⚠️ Queue fetch failed on partition {}, retrying: {}",
                        self.partition,
                        e
                    );
                    let mut shutdown = self.shutdown.clone();
                    tokio::select! {
                        _ = tokio::time::sleep(self.idle_wait) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
            };

            if messages.is_empty() {
                // Idle wait, cancellable by shutdown
                let mut shutdown = self.shutdown.clone();
                tokio::select! {
                    _ = tokio::time::sleep(self.idle_wait) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            for message in messages {
                // An in-flight message always runs to completion; the
                // shutdown signal is honored between messages.
                self.process_message(&message).await?;

                if *self.shutdown.borrow() {
                    self.state = ProcessorState::Draining;
                    log::info!(
                        "🔄 Worker partition {} {} — in-flight message committed",
                        self.partition,
                        self.state.as_str()
                    );
                    return Ok(());
                }
            }
        }
    }

    /// The five-step pipeline for one queue message.
    async fn process_message(&mut self, message: &QueueMessage) -> Result<(), WorkerError> {
        let records: Vec<Value> = match serde_json::from_slice(&message.payload) {
            Ok(Value::Array(records)) => records,
            Ok(_) | Err(_) => {
                // The whole message is malformed: dead-letter it as a unit
                log::warn!(
                    "⚠️ Message at offset {} is not a JSON array, dead-lettering whole payload",
                    message.offset
                );
                let entry = DeadLetterEntry {
                    partition: self.partition,
                    offset: message.offset,
                    record_idx: 0,
                    payload: String::from_utf8_lossy(&message.payload).into_owned(),
                    reason: "payload is not a JSON array".to_string(),
                    received_at: chrono::Utc::now().timestamp_millis(),
                };
                self.write_dead_letters(&[entry]).await?;
                let outcome = MessageOutcome {
                    valid: 0,
                    dead_lettered: 1,
                };
                self.commit(message.offset, outcome).await?;
                return Ok(());
            }
        };

        let mut valid_records = Vec::with_capacity(records.len());
        let mut rejects = Vec::new();

        for (idx, raw) in records.iter().enumerate() {
            let ingestion_time = self.next_ingestion_time();
            match validate_and_transform(raw, ingestion_time) {
                // Keep the record's index within the message: it is part of
                // the raw store's replay-dedupe key
                Ok(record) => valid_records.push((idx, record)),
                Err(reason) => {
                    log::warn!(
                        "⚠️ Record {} at offset {} failed validation: {}",
                        idx,
                        message.offset,
                        reason
                    );
                    rejects.push(DeadLetterEntry {
                        partition: self.partition,
                        offset: message.offset,
                        record_idx: idx,
                        payload: raw.to_string(),
                        reason: reason.to_string(),
                        received_at: ingestion_time,
                    });
                }
            }
        }

        // Dual-sink write: raw rows and dead letters first (both idempotent
        // under replay), then aggregates + checkpoint atomically.
        self.write_raw(message.offset, &valid_records).await?;
        self.write_dead_letters(&rejects).await?;

        for (_, record) in &valid_records {
            self.stats.apply(record);
        }

        let outcome = MessageOutcome {
            valid: valid_records.len(),
            dead_lettered: rejects.len(),
        };
        self.commit(message.offset, outcome).await
    }

    fn next_ingestion_time(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        self.last_ingestion_time = std::cmp::max(now, self.last_ingestion_time);
        self.last_ingestion_time
    }

    async fn write_raw(
        &mut self,
        offset: i64,
        records: &[(usize, types::UserRecord)],
    ) -> Result<(), WorkerError> {
        let mut backoff = ExponentialBackoff::for_sink_writes();

        loop {
            match self.raw_store.append_batch(self.partition, offset, records) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::error!("❌ Raw store write failed: {}", e);
                    if backoff.sleep().await.is_err() {
                        // Exhausted: hold the batch back from checkpoint so
                        // it is reprocessed after restart
                        return Err(WorkerError::SinkWrite(e.to_string()));
                    }
                }
            }
        }
    }

    async fn write_dead_letters(&mut self, entries: &[DeadLetterEntry]) -> Result<(), WorkerError> {
        let mut backoff = ExponentialBackoff::for_sink_writes();

        loop {
            match self.dead_letters.record(entries) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::error!("❌ Dead-letter write failed: {}", e);
                    if backoff.sleep().await.is_err() {
                        return Err(WorkerError::SinkWrite(e.to_string()));
                    }
                }
            }
        }
    }

    /// Commit the pending deltas and the new checkpoint in one
    /// transaction. Failure after retries is fatal for this worker.
    async fn commit(&mut self, offset: i64, outcome: MessageOutcome) -> Result<(), WorkerError> {
        let deltas = self.stats.take_pending();
        let mut backoff = ExponentialBackoff::for_sink_writes();

        loop {
            match self.aggregate_store.commit_batch(&deltas, self.partition, offset) {
                Ok(()) => {
                    self.committed_offset = offset;
                    log::info!(
                        "📊 Partition {} offset {}: {} valid, {} dead-lettered, {} countries updated",
                        self.partition,
                        offset,
                        outcome.valid,
                        outcome.dead_lettered,
                        deltas.len()
                    );
                    return Ok(());
                }
                Err(e) => {
                    log::error!("❌ Aggregate/checkpoint commit failed: {}", e);
                    if backoff.sleep().await.is_err() {
                        return Err(WorkerError::CheckpointPersist(e.to_string()));
                    }
                }
            }
        }
    }
}
