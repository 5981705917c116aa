//! Shared SQLite PRAGMA setup applied to every connection the pipeline opens.

use rusqlite::Connection;

/// Apply optimized PRAGMAs (WAL, NORMAL, MEMORY, mmap, cache, autocheckpoint)
///
/// WAL mode lets the ingestor append while consumers read the same file;
/// NORMAL synchronous is durable enough under WAL for this workload.
pub fn apply_optimized_pragmas(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "mmap_size", 268_435_456i64)?;
    conn.pragma_update(None, "cache_size", -64_000i64)?;
    conn.pragma_update(None, "wal_autocheckpoint", 1_000i64)?;
    Ok(())
}
