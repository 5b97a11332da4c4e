//! Shared SQLite connection handling.
//!
//! The intervention store, the audit log and the local collaborators all
//! live in one database file and share a single connection guarded by a
//! mutex. Timestamps are stored as integer microseconds since the epoch so
//! that range comparisons and ordering happen in SQL.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use super::store::StoreError;

/// Connection shared between the stores of one database
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Open (or create) a database file.
///
/// `busy_timeout` bounds how long any statement waits on a locked database,
/// so no store call blocks its caller indefinitely.
pub fn open(path: &Path, busy_timeout: Duration) -> Result<SharedConnection, StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            StoreError::Corrupt(format!(
                "failed to create database directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Open a private in-memory database (tests, dry runs)
pub fn open_in_memory() -> Result<SharedConnection, StoreError> {
    let conn = Connection::open_in_memory()?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub(crate) fn lock(conn: &SharedConnection) -> Result<MutexGuard<'_, Connection>, StoreError> {
    conn.lock().map_err(|_| StoreError::LockPoisoned)
}

pub(crate) fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", micros)))
}

pub(crate) fn from_micros_opt(micros: Option<i64>) -> Result<Option<DateTime<Utc>>, StoreError> {
    micros.map(from_micros).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_micros_roundtrip_keeps_precision() {
        let ts = DateTime::<Utc>::from_timestamp_micros(1_767_225_600_123_456).unwrap();
        assert_eq!(from_micros(to_micros(ts)).unwrap(), ts);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("intervene.db");

        let conn = open(&path, Duration::from_millis(100)).unwrap();
        drop(conn);

        assert!(path.exists());
    }
}
