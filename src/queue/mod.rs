//! Durable queue contract
//!
//! Topic-based, partitioned, append-only log. Offsets are dense and
//! monotonically increasing per (topic, partition); consumers address reads
//! by offset, so each consumer group tracks its own position and a crash
//! before checkpointing causes redelivery rather than loss.

mod sqlite;

pub use self::sqlite::SqliteQueue;

/// Envelope for one published batch of raw source payloads
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub topic: String,
    pub partition: u32,
    pub offset: i64,
    /// Opaque at the queue layer; for the user topic this is the JSON array
    /// of raw source objects.
    pub payload: Vec<u8>,
    pub published_at: i64,
}

#[derive(Debug)]
pub enum QueueError {
    Unavailable(String),
    Database(String),
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Unavailable(msg) => write!(f, "Queue unavailable: {}", msg),
            QueueError::Database(msg) => write!(f, "Queue database error: {}", msg),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<rusqlite::Error> for QueueError {
    fn from(err: rusqlite::Error) -> Self {
        QueueError::Database(err.to_string())
    }
}
