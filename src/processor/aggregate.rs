//! Continuous per-country aggregation
//!
//! One row per distinct country, updated incrementally with a running count
//! and running mean — no per-record history is kept, so memory stays
//! bounded by the number of countries. The window is unbounded: rows never
//! expire. Alongside the running view, the table accumulates per-batch
//! deltas; commits hand the store deltas, not absolute rows, so two workers
//! feeding the same country merge rather than overwrite.

use super::types::{CountryAggregate, CountryDelta, UserRecord};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct CountryStatsTable {
    rows: HashMap<String, CountryAggregate>,
    /// Contributions since the last `take_pending` — only these are
    /// committed.
    pending: HashMap<String, CountryDelta>,
}

impl CountryStatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the table from persisted rows at worker startup, so the running
    /// count/mean continue across restarts instead of restarting from zero.
    pub fn restore(rows: Vec<CountryAggregate>) -> Self {
        let rows = rows
            .into_iter()
            .map(|row| (row.country.clone(), row))
            .collect();

        Self {
            rows,
            pending: HashMap::new(),
        }
    }

    /// Fold one validated record into its country's aggregate.
    ///
    /// Running mean: `avg += (age - avg) / (count + 1)` — numerically
    /// equivalent to the arithmetic mean over every contributing record.
    pub fn apply(&mut self, record: &UserRecord) {
        let row = self
            .rows
            .entry(record.country.clone())
            .or_insert_with(|| CountryAggregate {
                country: record.country.clone(),
                count_users: 0,
                avg_age: 0.0,
                last_update: record.ingestion_time,
            });

        row.avg_age += (record.age as f64 - row.avg_age) / (row.count_users as f64 + 1.0);
        row.count_users += 1;
        row.last_update = record.ingestion_time;

        let delta = self
            .pending
            .entry(record.country.clone())
            .or_insert_with(|| CountryDelta {
                country: record.country.clone(),
                count: 0,
                age_sum: 0.0,
                last_update: record.ingestion_time,
            });
        delta.count += 1;
        delta.age_sum += record.age as f64;
        delta.last_update = record.ingestion_time;
    }

    /// Drain the contributions accumulated since the last call. The caller
    /// commits these to the aggregate store.
    pub fn take_pending(&mut self) -> Vec<CountryDelta> {
        let mut changed: Vec<CountryDelta> = self.pending.drain().map(|(_, delta)| delta).collect();

        // Deterministic commit order
        changed.sort_by(|a, b| a.country.cmp(&b.country));
        changed
    }

    pub fn get(&self, country: &str) -> Option<&CountryAggregate> {
        self.rows.get(country)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
