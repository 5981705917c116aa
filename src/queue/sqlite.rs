//! SQLite-backed durable queue
//!
//! One file holds every topic. Offsets are assigned inside the publish
//! transaction, so publish order within a partition is exact and gapless.
//! Messages are retained indefinitely — replayability is the point.

use super::{QueueError, QueueMessage};
use crate::sqlite_pragma::apply_optimized_pragmas;
use rusqlite::{params, Connection};
use std::path::Path;

pub struct SqliteQueue {
    conn: Connection,
}

impl SqliteQueue {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, QueueError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    QueueError::Unavailable(format!(
                        "Failed to create queue directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS queue_messages (
                topic TEXT NOT NULL,
                partition_id INTEGER NOT NULL,
                msg_offset INTEGER NOT NULL,
                payload BLOB NOT NULL,
                published_at INTEGER NOT NULL,
                PRIMARY KEY (topic, partition_id, msg_offset)
            )",
            [],
        )?;

        log::info!("✅ Queue database initialized with WAL mode");

        Ok(Self { conn })
    }

    /// Append one message to a partition, returning its assigned offset.
    ///
    /// The offset is computed and the row inserted in a single transaction,
    /// which is what preserves publish order under concurrent writers.
    pub fn publish(
        &mut self,
        topic: &str,
        partition: u32,
        payload: &[u8],
    ) -> Result<i64, QueueError> {
        let tx = self.conn.transaction()?;

        let next_offset: i64 = tx.query_row(
            "SELECT COALESCE(MAX(msg_offset), -1) + 1 FROM queue_messages
             WHERE topic = ?1 AND partition_id = ?2",
            params![topic, partition],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO queue_messages (topic, partition_id, msg_offset, payload, published_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                topic,
                partition,
                next_offset,
                payload,
                chrono::Utc::now().timestamp_millis()
            ],
        )?;

        tx.commit()?;

        Ok(next_offset)
    }

    /// Read up to `limit` messages with offsets strictly greater than
    /// `after_offset`, in offset order. Pass -1 to read from the beginning.
    pub fn fetch(
        &self,
        topic: &str,
        partition: u32,
        after_offset: i64,
        limit: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut stmt = self.conn.prepare(
            "SELECT msg_offset, payload, published_at FROM queue_messages
             WHERE topic = ?1 AND partition_id = ?2 AND msg_offset > ?3
             ORDER BY msg_offset ASC
             LIMIT ?4",
        )?;

        let rows = stmt.query_map(
            params![topic, partition, after_offset, limit as i64],
            |row| {
                Ok(QueueMessage {
                    topic: topic.to_string(),
                    partition,
                    offset: row.get(0)?,
                    payload: row.get(1)?,
                    published_at: row.get(2)?,
                })
            },
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }

        Ok(messages)
    }

    /// Highest assigned offset for a partition, or None if it is empty.
    /// Used for lag observation against a consumer's checkpoint.
    pub fn latest_offset(&self, topic: &str, partition: u32) -> Result<Option<i64>, QueueError> {
        let offset: Option<i64> = self.conn.query_row(
            "SELECT MAX(msg_offset) FROM queue_messages WHERE topic = ?1 AND partition_id = ?2",
            params![topic, partition],
            |row| row.get(0),
        )?;

        Ok(offset)
    }
}
