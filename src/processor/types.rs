//! Core record types flowing through the stream processor

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Unknown,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Unknown => "unknown",
        }
    }

    /// Presence and type are validated upstream; vocabulary is not, so any
    /// other string maps to `Unknown`.
    pub fn from_source(s: &str) -> Self {
        match s {
            "male" => Gender::Male,
            "female" => Gender::Female,
            _ => Gender::Unknown,
        }
    }
}

/// One validated, transformed user record. Immutable once written to the
/// raw store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Source-assigned unique identifier (login.uuid)
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    /// Derived: first + " " + last
    pub full_name: String,
    pub gender: Gender,
    pub age: u32,
    pub country: String,
    /// Unix millis assigned at processing; monotonic non-decreasing per
    /// partition
    pub ingestion_time: i64,
}

/// One live rollup row per country, mutated in place as records arrive.
#[derive(Debug, Clone, PartialEq)]
pub struct CountryAggregate {
    pub country: String,
    pub count_users: u64,
    pub avg_age: f64,
    /// Unix millis of the most recent contributing record
    pub last_update: i64,
}

/// A country's contribution from one committed batch. Commits carry deltas
/// rather than absolute rows so concurrent partition workers merge instead
/// of overwriting each other.
#[derive(Debug, Clone, PartialEq)]
pub struct CountryDelta {
    pub country: String,
    /// Records folded in since the last commit, always >= 1
    pub count: u64,
    /// Sum of those records' ages; the store recomputes the mean in-place
    pub age_sum: f64,
    pub last_update: i64,
}
