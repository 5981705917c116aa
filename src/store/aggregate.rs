//! Keyed aggregate store with the consumer checkpoint in the same
//! transaction boundary
//!
//! `commit_batch` merges a batch's per-country deltas AND the partition's
//! checkpoint in one SQLite transaction. Either both land or neither does,
//! so a replayed message after a crash re-derives the same aggregate state
//! instead of double-counting.

use super::{ensure_parent_dir, StoreError};
use crate::processor::types::{CountryAggregate, CountryDelta};
use crate::sqlite_pragma::apply_optimized_pragmas;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub struct SqliteAggregateStore {
    conn: Connection,
}

impl SqliteAggregateStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        ensure_parent_dir(db_path.as_ref())?;

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS country_stats (
                country TEXT PRIMARY KEY,
                count_users INTEGER NOT NULL,
                avg_age REAL NOT NULL,
                last_update INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS consumer_checkpoints (
                partition_id INTEGER PRIMARY KEY,
                committed_offset INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        log::info!("✅ Aggregate store initialized with WAL mode");

        Ok(Self { conn })
    }

    /// Merge the batch's contributions into their country rows and advance
    /// the partition checkpoint atomically.
    ///
    /// The upsert folds each delta into the stored row inside the SQL
    /// statement (count added, mean recomputed from the stored row plus the
    /// delta's age sum), so writers on different partitions compose instead
    /// of overwriting each other's counts.
    pub fn commit_batch(
        &mut self,
        deltas: &[CountryDelta],
        partition: u32,
        offset: i64,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;

        for delta in deltas {
            // In the DO UPDATE arm every country_stats.* reference reads the
            // pre-update row, so the mean and the count stay consistent.
            tx.execute(
                "INSERT INTO country_stats (country, count_users, avg_age, last_update)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(country) DO UPDATE SET
                     avg_age = (country_stats.avg_age * country_stats.count_users + ?5)
                               / (country_stats.count_users + ?2),
                     count_users = country_stats.count_users + ?2,
                     last_update = MAX(country_stats.last_update, excluded.last_update)",
                params![
                    delta.country,
                    delta.count as i64,
                    delta.age_sum / delta.count as f64,
                    delta.last_update,
                    delta.age_sum,
                ],
            )?;
        }

        tx.execute(
            "INSERT INTO consumer_checkpoints (partition_id, committed_offset, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(partition_id) DO UPDATE SET
                 committed_offset = excluded.committed_offset,
                 updated_at = excluded.updated_at",
            params![partition, offset, chrono::Utc::now().timestamp_millis()],
        )?;

        tx.commit()?;

        log::debug!(
            "✅ Merged {} country deltas, partition {} checkpoint -> {}",
            deltas.len(),
            partition,
            offset
        );

        Ok(())
    }

    /// Last durably processed offset for a partition, or None before the
    /// first commit.
    pub fn checkpoint(&self, partition: u32) -> Result<Option<i64>, StoreError> {
        let offset = self
            .conn
            .query_row(
                "SELECT committed_offset FROM consumer_checkpoints WHERE partition_id = ?1",
                params![partition],
                |row| row.get(0),
            )
            .optional()?;

        Ok(offset)
    }

    /// Full-table scan — the dashboard read contract.
    pub fn scan_all(&self) -> Result<Vec<CountryAggregate>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT country, count_users, avg_age, last_update
             FROM country_stats
             ORDER BY country ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(CountryAggregate {
                country: row.get(0)?,
                count_users: row.get::<_, i64>(1)? as u64,
                avg_age: row.get(2)?,
                last_update: row.get(3)?,
            })
        })?;

        let mut aggregates = Vec::new();
        for row in rows {
            aggregates.push(row?);
        }

        Ok(aggregates)
    }

    pub fn get(&self, country: &str) -> Result<Option<CountryAggregate>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT country, count_users, avg_age, last_update
                 FROM country_stats WHERE country = ?1",
                params![country],
                |row| {
                    Ok(CountryAggregate {
                        country: row.get(0)?,
                        count_users: row.get::<_, i64>(1)? as u64,
                        avg_age: row.get(2)?,
                        last_update: row.get(3)?,
                    })
                },
            )
            .optional()?;

        Ok(row)
    }
}
