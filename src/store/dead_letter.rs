//! Dead-letter sink for records that fail validation
//!
//! Rejects are retained for inspection, never discarded. Keyed on
//! `(partition, offset, record_idx)` with `INSERT OR IGNORE` so a replayed
//! message does not double-count its dead letters.

use super::{ensure_parent_dir, StoreError};
use crate::sqlite_pragma::apply_optimized_pragmas;
use rusqlite::{params, Connection};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub partition: u32,
    pub offset: i64,
    /// Index of the record within its queue message
    pub record_idx: usize,
    /// Original record JSON, verbatim
    pub payload: String,
    pub reason: String,
    pub received_at: i64,
}

pub struct SqliteDeadLetterSink {
    conn: Connection,
}

impl SqliteDeadLetterSink {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        ensure_parent_dir(db_path.as_ref())?;

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS dead_letters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                partition_id INTEGER NOT NULL,
                msg_offset INTEGER NOT NULL,
                record_idx INTEGER NOT NULL,
                payload TEXT NOT NULL,
                reason TEXT NOT NULL,
                received_at INTEGER NOT NULL,
                UNIQUE (partition_id, msg_offset, record_idx)
            )",
            [],
        )?;

        Ok(Self { conn })
    }

    pub fn record(&mut self, entries: &[DeadLetterEntry]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;

        for entry in entries {
            tx.execute(
                "INSERT OR IGNORE INTO dead_letters
                 (partition_id, msg_offset, record_idx, payload, reason, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.partition,
                    entry.offset,
                    entry.record_idx as i64,
                    entry.payload,
                    entry.reason,
                    entry.received_at,
                ],
            )?;
        }

        tx.commit()?;

        Ok(())
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Latest `n` rejects for inspection.
    pub fn latest(&self, n: usize) -> Result<Vec<DeadLetterEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT partition_id, msg_offset, record_idx, payload, reason, received_at
             FROM dead_letters
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![n as i64], |row| {
            Ok(DeadLetterEntry {
                partition: row.get(0)?,
                offset: row.get(1)?,
                record_idx: row.get::<_, i64>(2)? as usize,
                payload: row.get(3)?,
                reason: row.get(4)?,
                received_at: row.get(5)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }

        Ok(entries)
    }
}
