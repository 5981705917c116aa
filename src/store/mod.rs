//! Persistent sinks: raw store, aggregate store (with checkpoints), and the
//! dead-letter sink.

mod aggregate;
mod dead_letter;
mod raw;

pub use self::aggregate::SqliteAggregateStore;
pub use self::dead_letter::{DeadLetterEntry, SqliteDeadLetterSink};
pub use self::raw::{RawUserRow, SqliteRawStore};

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Database(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// Create the parent directory of a database path if it is missing.
pub(crate) fn ensure_parent_dir(path: &std::path::Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
