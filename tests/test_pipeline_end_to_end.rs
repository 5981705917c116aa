//! End-to-end pipeline tests: scripted source → queue → worker → stores
//!
//! Each test runs the real components against tempfile SQLite databases;
//! only the external user-data provider is scripted.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::sync::watch;
use userflow::ingestor::Ingestor;
use userflow::processor::{PartitionWorker, ProcessorState, WorkerError};
use userflow::queue::SqliteQueue;
use userflow::source::{SourceError, UserSource};
use userflow::store::{SqliteAggregateStore, SqliteDeadLetterSink, SqliteRawStore};
use userflow::USER_TOPIC;

/// Scripted source: pops one pre-programmed batch per fetch.
struct ScriptedSource {
    batches: Mutex<Vec<Vec<Value>>>,
}

impl ScriptedSource {
    fn new(batches: Vec<Vec<Value>>) -> Self {
        Self {
            batches: Mutex::new(batches),
        }
    }
}

#[async_trait]
impl UserSource for ScriptedSource {
    async fn fetch_batch(&self) -> Result<Vec<Value>, SourceError> {
        let mut batches = self.batches.lock().unwrap();
        if batches.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(batches.remove(0))
        }
    }
}

fn user(uuid: &str, first: &str, last: &str, country: &str, age: u32) -> Value {
    json!({
        "gender": "female",
        "name": { "first": first, "last": last },
        "location": { "country": country },
        "dob": { "age": age },
        "login": { "uuid": uuid }
    })
}

struct Paths {
    _dir: TempDir,
    queue: std::path::PathBuf,
    raw: std::path::PathBuf,
    agg: std::path::PathBuf,
}

fn make_paths() -> Paths {
    let dir = tempdir().unwrap();
    Paths {
        queue: dir.path().join("queue.db"),
        raw: dir.path().join("raw_store.db"),
        agg: dir.path().join("aggregate_store.db"),
        _dir: dir,
    }
}

fn make_worker(paths: &Paths, shutdown: watch::Receiver<bool>) -> PartitionWorker {
    make_partition_worker(paths, 0, shutdown)
}

fn make_partition_worker(
    paths: &Paths,
    partition: u32,
    shutdown: watch::Receiver<bool>,
) -> PartitionWorker {
    PartitionWorker::new(
        USER_TOPIC,
        partition,
        SqliteQueue::open(&paths.queue).unwrap(),
        SqliteRawStore::open(&paths.raw).unwrap(),
        SqliteDeadLetterSink::open(&paths.raw).unwrap(),
        SqliteAggregateStore::open(&paths.agg).unwrap(),
        16,
        Duration::from_millis(10),
        shutdown,
    )
}

/// Run the worker until `done` reports true (or panic after 5s), then drain
/// it and hand it back for inspection.
async fn run_worker_until(
    mut worker: PartitionWorker,
    shutdown_tx: watch::Sender<bool>,
    done: impl Fn() -> bool + Send + 'static,
) -> (PartitionWorker, Result<(), WorkerError>) {
    let handle = tokio::spawn(async move {
        let result = worker.run().await;
        (worker, result)
    });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "worker did not reach expected state in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap()
}

#[tokio::test]
async fn test_end_to_end_batch_aggregation() {
    // Ingest one batch of 3 records: US/30, US/40, FR/50
    let paths = make_paths();
    let source = Arc::new(ScriptedSource::new(vec![vec![
        user("u-1", "Alice", "Able", "US", 30),
        user("u-2", "Bob", "Baker", "US", 40),
        user("u-3", "Chloe", "Cadet", "FR", 50),
    ]]));

    let mut ingestor = Ingestor::new(
        source,
        SqliteQueue::open(&paths.queue).unwrap(),
        USER_TOPIC,
        1,
        Duration::from_secs(10),
    );
    ingestor.tick().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = make_worker(&paths, shutdown_rx);

    let raw_path = paths.raw.clone();
    let (worker, result) = run_worker_until(worker, shutdown_tx, move || {
        SqliteRawStore::open(&raw_path).unwrap().count().unwrap() == 3
    })
    .await;

    result.unwrap();
    assert_eq!(worker.state(), ProcessorState::Stopped);
    assert_eq!(worker.committed_offset(), 0);

    let agg_store = SqliteAggregateStore::open(&paths.agg).unwrap();
    let rows = agg_store.scan_all().unwrap();
    assert_eq!(rows.len(), 2);

    let fr = agg_store.get("FR").unwrap().unwrap();
    assert_eq!(fr.count_users, 1);
    assert!((fr.avg_age - 50.0).abs() < 1e-9);

    let us = agg_store.get("US").unwrap().unwrap();
    assert_eq!(us.count_users, 2);
    assert!((us.avg_age - 35.0).abs() < 1e-9);

    let raw_store = SqliteRawStore::open(&paths.raw).unwrap();
    assert_eq!(raw_store.count().unwrap(), 3);
    assert_eq!(SqliteDeadLetterSink::open(&paths.raw).unwrap().count().unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_record_dead_lettered() {
    // One of 3 records is missing login.uuid
    let mut broken = user("unused", "Dan", "Drew", "US", 44);
    broken["login"].as_object_mut().unwrap().remove("uuid");

    let paths = make_paths();
    let source = Arc::new(ScriptedSource::new(vec![vec![
        user("u-1", "Alice", "Able", "US", 30),
        broken,
        user("u-3", "Chloe", "Cadet", "FR", 50),
    ]]));

    let mut ingestor = Ingestor::new(
        source,
        SqliteQueue::open(&paths.queue).unwrap(),
        USER_TOPIC,
        1,
        Duration::from_secs(10),
    );
    ingestor.tick().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = make_worker(&paths, shutdown_rx);

    let raw_path = paths.raw.clone();
    let (_, result) = run_worker_until(worker, shutdown_tx, move || {
        SqliteRawStore::open(&raw_path).unwrap().count().unwrap() == 2
    })
    .await;
    result.unwrap();

    let dead_letters = SqliteDeadLetterSink::open(&paths.raw).unwrap();
    assert_eq!(dead_letters.count().unwrap(), 1);
    let entry = &dead_letters.latest(1).unwrap()[0];
    assert!(entry.reason.contains("login.uuid"));

    // Aggregates reflect only the 2 valid records
    let agg_store = SqliteAggregateStore::open(&paths.agg).unwrap();
    let us = agg_store.get("US").unwrap().unwrap();
    assert_eq!(us.count_users, 1);
    assert!((us.avg_age - 30.0).abs() < 1e-9);
    assert_eq!(agg_store.get("FR").unwrap().unwrap().count_users, 1);
}

#[tokio::test]
async fn test_replay_after_crash_before_checkpoint() {
    // Crash-before-checkpoint: raw rows landed but the atomic
    // {aggregates + checkpoint} commit did not. Simulated by processing
    // once against a throwaway aggregate store, then replaying the same
    // queue message against the real (still-empty) one.
    let paths = make_paths();
    let mut queue = SqliteQueue::open(&paths.queue).unwrap();
    let batch = vec![
        user("u-1", "Alice", "Able", "US", 30),
        user("u-2", "Bob", "Baker", "US", 40),
    ];
    queue.publish(USER_TOPIC, 0, &serde_json::to_vec(&batch).unwrap()).unwrap();

    // First attempt: aggregate commits go to a database that "crashes"
    let lost_dir = tempdir().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = PartitionWorker::new(
        USER_TOPIC,
        0,
        SqliteQueue::open(&paths.queue).unwrap(),
        SqliteRawStore::open(&paths.raw).unwrap(),
        SqliteDeadLetterSink::open(&paths.raw).unwrap(),
        SqliteAggregateStore::open(lost_dir.path().join("lost.db")).unwrap(),
        16,
        Duration::from_millis(10),
        shutdown_rx,
    );
    let raw_path = paths.raw.clone();
    let (_, result) = run_worker_until(worker, shutdown_tx, move || {
        SqliteRawStore::open(&raw_path).unwrap().count().unwrap() == 2
    })
    .await;
    result.unwrap();
    drop(lost_dir); // the crash

    // Restart: checkpoint is absent, so the message is redelivered
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = make_worker(&paths, shutdown_rx);
    let agg_path = paths.agg.clone();
    let (worker, result) = run_worker_until(worker, shutdown_tx, move || {
        SqliteAggregateStore::open(&agg_path)
            .unwrap()
            .checkpoint(0)
            .unwrap()
            == Some(0)
    })
    .await;
    result.unwrap();
    assert_eq!(worker.committed_offset(), 0);

    // Same state as processing once: no duplicated raw rows, no
    // double-counted aggregates
    let raw_store = SqliteRawStore::open(&paths.raw).unwrap();
    assert_eq!(raw_store.count().unwrap(), 2);

    let us = SqliteAggregateStore::open(&paths.agg)
        .unwrap()
        .get("US")
        .unwrap()
        .unwrap();
    assert_eq!(us.count_users, 2);
    assert!((us.avg_age - 35.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_restart_resumes_from_checkpoint() {
    // Offsets committed before a restart are not reprocessed
    let paths = make_paths();
    let mut queue = SqliteQueue::open(&paths.queue).unwrap();
    for i in 0..3 {
        let batch = vec![user(&format!("u-{}", i), "Ada", "Lovelace", "UK", 30 + i)];
        queue.publish(USER_TOPIC, 0, &serde_json::to_vec(&batch).unwrap()).unwrap();
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = make_worker(&paths, shutdown_rx);
    let agg_path = paths.agg.clone();
    let (worker, result) = run_worker_until(worker, shutdown_tx, move || {
        SqliteAggregateStore::open(&agg_path)
            .unwrap()
            .checkpoint(0)
            .unwrap()
            == Some(2)
    })
    .await;
    result.unwrap();
    assert_eq!(worker.committed_offset(), 2);

    let uk_before = SqliteAggregateStore::open(&paths.agg)
        .unwrap()
        .get("UK")
        .unwrap()
        .unwrap();
    assert_eq!(uk_before.count_users, 3);

    // Restart with no new messages: nothing is reprocessed
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut worker = make_worker(&paths, shutdown_rx);
    let handle = tokio::spawn(async move {
        let result = worker.run().await;
        (worker, result)
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown_tx.send(true).unwrap();
    let (worker, result) = handle.await.unwrap();
    result.unwrap();
    assert_eq!(worker.committed_offset(), 2);

    let uk_after = SqliteAggregateStore::open(&paths.agg)
        .unwrap()
        .get("UK")
        .unwrap()
        .unwrap();
    assert_eq!(uk_after.count_users, 3);
    assert_eq!(uk_after.avg_age, uk_before.avg_age);
    assert_eq!(SqliteRawStore::open(&paths.raw).unwrap().count().unwrap(), 3);
}

#[tokio::test]
async fn test_partition_workers_share_country() {
    // Two partitions both feed the same country. Each worker seeds its view
    // before the other commits, so the final row must be the merge of both
    // contributions, never just the last writer's.
    let paths = make_paths();
    let mut queue = SqliteQueue::open(&paths.queue).unwrap();
    let batch_a = vec![user("u-1", "Alice", "Able", "US", 30)];
    let batch_b = vec![user("u-2", "Bob", "Baker", "US", 40)];
    queue.publish(USER_TOPIC, 0, &serde_json::to_vec(&batch_a).unwrap()).unwrap();
    queue.publish(USER_TOPIC, 1, &serde_json::to_vec(&batch_b).unwrap()).unwrap();

    let (shutdown_tx_a, shutdown_rx_a) = watch::channel(false);
    let (shutdown_tx_b, shutdown_rx_b) = watch::channel(false);
    let mut worker_a = make_partition_worker(&paths, 0, shutdown_rx_a);
    let mut worker_b = make_partition_worker(&paths, 1, shutdown_rx_b);

    let handle_a = tokio::spawn(async move { worker_a.run().await });
    let handle_b = tokio::spawn(async move { worker_b.run().await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let agg_store = SqliteAggregateStore::open(&paths.agg).unwrap();
        if agg_store.checkpoint(0).unwrap() == Some(0)
            && agg_store.checkpoint(1).unwrap() == Some(0)
        {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "workers did not both commit in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown_tx_a.send(true).unwrap();
    shutdown_tx_b.send(true).unwrap();
    handle_a.await.unwrap().unwrap();
    handle_b.await.unwrap().unwrap();

    let us = SqliteAggregateStore::open(&paths.agg)
        .unwrap()
        .get("US")
        .unwrap()
        .unwrap();
    assert_eq!(us.count_users, 2);
    assert!((us.avg_age - 35.0).abs() < 1e-9);
    assert_eq!(SqliteRawStore::open(&paths.raw).unwrap().count().unwrap(), 2);
}

#[tokio::test]
async fn test_repeated_user_across_batches_counts_in_both_stores() {
    // The same login.uuid served again in a later source batch is two
    // observations: two raw rows and two aggregate contributions, so the
    // dashboard's row count and count_users agree.
    let paths = make_paths();
    let mut queue = SqliteQueue::open(&paths.queue).unwrap();
    for age in [30u32, 40] {
        let batch = vec![user("u-repeat", "Alice", "Able", "US", age)];
        queue.publish(USER_TOPIC, 0, &serde_json::to_vec(&batch).unwrap()).unwrap();
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = make_worker(&paths, shutdown_rx);
    let agg_path = paths.agg.clone();
    let (_, result) = run_worker_until(worker, shutdown_tx, move || {
        SqliteAggregateStore::open(&agg_path)
            .unwrap()
            .checkpoint(0)
            .unwrap()
            == Some(1)
    })
    .await;
    result.unwrap();

    let us = SqliteAggregateStore::open(&paths.agg)
        .unwrap()
        .get("US")
        .unwrap()
        .unwrap();
    assert_eq!(us.count_users, 2);
    assert!((us.avg_age - 35.0).abs() < 1e-9);
    assert_eq!(SqliteRawStore::open(&paths.raw).unwrap().count().unwrap(), 2);
}

#[tokio::test]
async fn test_dashboard_read_contract() {
    // Latest-N raw reads come back in non-increasing ingestion_time order,
    // and the aggregate scan sees every country, right after processing.
    let paths = make_paths();
    let source = Arc::new(ScriptedSource::new(vec![
        vec![
            user("u-1", "Alice", "Able", "US", 30),
            user("u-2", "Bob", "Baker", "FR", 40),
        ],
        vec![
            user("u-3", "Chloe", "Cadet", "BR", 50),
            user("u-4", "Dan", "Drew", "JP", 60),
        ],
    ]));

    let mut ingestor = Ingestor::new(
        source,
        SqliteQueue::open(&paths.queue).unwrap(),
        USER_TOPIC,
        1,
        Duration::from_secs(10),
    );
    ingestor.tick().await;
    ingestor.tick().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = make_worker(&paths, shutdown_rx);
    let raw_path = paths.raw.clone();
    let (_, result) = run_worker_until(worker, shutdown_tx, move || {
        SqliteRawStore::open(&raw_path).unwrap().count().unwrap() == 4
    })
    .await;
    result.unwrap();

    let raw_store = SqliteRawStore::open(&paths.raw).unwrap();
    let latest = raw_store.latest(3).unwrap();
    assert_eq!(latest.len(), 3);
    for pair in latest.windows(2) {
        assert!(pair[0].ingestion_time >= pair[1].ingestion_time);
    }
    // Newest record first
    assert_eq!(latest[0].user_id, "u-4");

    let countries: Vec<String> = SqliteAggregateStore::open(&paths.agg)
        .unwrap()
        .scan_all()
        .unwrap()
        .into_iter()
        .map(|row| row.country)
        .collect();
    assert_eq!(countries, vec!["BR", "FR", "JP", "US"]);
}

#[tokio::test]
async fn test_malformed_payload_dead_letters_whole_message() {
    // A payload that is not a JSON array never reaches the stores but still
    // advances the checkpoint
    let paths = make_paths();
    let mut queue = SqliteQueue::open(&paths.queue).unwrap();
    queue.publish(USER_TOPIC, 0, b"not json at all").unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = make_worker(&paths, shutdown_rx);
    let agg_path = paths.agg.clone();
    let (_, result) = run_worker_until(worker, shutdown_tx, move || {
        SqliteAggregateStore::open(&agg_path)
            .unwrap()
            .checkpoint(0)
            .unwrap()
            == Some(0)
    })
    .await;
    result.unwrap();

    assert_eq!(SqliteRawStore::open(&paths.raw).unwrap().count().unwrap(), 0);
    assert_eq!(SqliteDeadLetterSink::open(&paths.raw).unwrap().count().unwrap(), 1);
    assert!(SqliteAggregateStore::open(&paths.agg).unwrap().scan_all().unwrap().is_empty());
}
