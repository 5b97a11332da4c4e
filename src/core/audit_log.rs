//! Append-only audit log.
//!
//! Every lifecycle event of an intervention is appended here and never
//! updated or deleted. The log is read sorted by timestamp, newest first,
//! with a bounded page size. Timestamps are stored in microseconds and kept
//! strictly increasing per intervention, so entries of one record always
//! sort in the order they were written.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde_json::Value;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::domain::{AuditAction, AuditLogEntry};

use super::db::{self, from_micros, to_micros, SharedConnection};
use super::store::StoreError;

/// Upper bound on entries returned by a single query
pub const MAX_PAGE_SIZE: usize = 1000;

/// Audit log failures
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to write audit entry '{action}' for {intervention_id}: {source}")]
    Write {
        action: AuditAction,
        intervention_id: Uuid,
        #[source]
        source: StoreError,
    },

    #[error("Failed to query audit log: {0}")]
    Query(#[from] StoreError),
}

/// Receives audit write failures so they reach an alerting path
pub trait AuditAlertSink: Send + Sync {
    fn audit_write_failed(&self, entry: &AuditLogEntry, error: &AuditError);
}

/// Reports audit write failures as error-level tracing events
#[derive(Debug, Default)]
pub struct TracingAlertSink;

impl AuditAlertSink for TracingAlertSink {
    fn audit_write_failed(&self, entry: &AuditLogEntry, error: &AuditError) {
        error!(
            intervention_id = %entry.intervention_id,
            action = %entry.action,
            details = %entry.details,
            error = %error,
            "AUDIT WRITE FAILED: lifecycle event not persisted"
        );
    }
}

/// Filters for [`AuditLog::query`]. All filters are optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditQuery {
    /// Inclusive lower bound
    pub start: Option<DateTime<Utc>>,

    /// Inclusive upper bound
    pub end: Option<DateTime<Utc>>,

    pub intervention_id: Option<Uuid>,

    pub action: Option<AuditAction>,

    /// Page size; clamped to the log's configured maximum
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn for_intervention(id: Uuid) -> Self {
        Self {
            intervention_id: Some(id),
            ..Default::default()
        }
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// SQLite-backed append-only audit log
pub struct AuditLog {
    conn: SharedConnection,
    page_size: usize,
    alert: Arc<dyn AuditAlertSink>,
    failed_writes: AtomicU64,
}

impl AuditLog {
    /// Wrap a connection, creating the table if needed
    pub fn new(conn: SharedConnection, page_size: usize) -> Result<Self, StoreError> {
        {
            let guard = db::lock(&conn)?;
            guard.execute_batch(
                "CREATE TABLE IF NOT EXISTS intervention_audit_log (
                    timestamp INTEGER NOT NULL,
                    action TEXT NOT NULL,
                    intervention_id TEXT NOT NULL,
                    details TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_audit_intervention
                    ON intervention_audit_log(intervention_id, timestamp);
                CREATE INDEX IF NOT EXISTS idx_audit_timestamp
                    ON intervention_audit_log(timestamp);",
            )?;
        }

        Ok(Self {
            conn,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            alert: Arc::new(TracingAlertSink),
            failed_writes: AtomicU64::new(0),
        })
    }

    /// Route write failures to a custom alerting sink
    pub fn with_alert_sink(mut self, alert: Arc<dyn AuditAlertSink>) -> Self {
        self.alert = alert;
        self
    }

    /// Record a lifecycle event without failing the caller.
    ///
    /// A failed write is never swallowed: it is handed to the alert sink and
    /// counted in [`AuditLog::failed_writes`].
    pub async fn log(&self, action: AuditAction, intervention_id: Uuid, details: Value) {
        let entry = AuditLogEntry::new(action, intervention_id, details);
        if let Err(e) = self.append(entry.clone()).await {
            self.failed_writes.fetch_add(1, Ordering::Relaxed);
            self.alert.audit_write_failed(&entry, &e);
        }
    }

    /// Append an entry, returning it as stored.
    ///
    /// If the entry's timestamp is not after the latest entry of the same
    /// intervention (clock skew, same-microsecond writes) it is bumped to one
    /// microsecond past it.
    pub async fn append(&self, entry: AuditLogEntry) -> Result<AuditLogEntry, AuditError> {
        let (action, intervention_id) = (entry.action, entry.intervention_id);
        let write_err = move |source: StoreError| AuditError::Write {
            action,
            intervention_id,
            source,
        };

        let details = serde_json::to_string(&entry.details)
            .map_err(|e| write_err(StoreError::from(e)))?;
        let id = entry.intervention_id.to_string();

        let stored_micros = {
            let guard = db::lock(&self.conn).map_err(write_err)?;
            let last: Option<i64> = guard
                .query_row(
                    "SELECT MAX(timestamp) FROM intervention_audit_log WHERE intervention_id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .map_err(|e| write_err(StoreError::from(e)))?;

            let mut micros = to_micros(entry.timestamp);
            if let Some(last) = last {
                if micros <= last {
                    micros = last + 1;
                }
            }

            guard
                .execute(
                    "INSERT INTO intervention_audit_log (timestamp, action, intervention_id, details)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![micros, entry.action.as_str(), id, details],
                )
                .map_err(|e| write_err(StoreError::from(e)))?;
            micros
        };

        Ok(AuditLogEntry {
            timestamp: from_micros(stored_micros).map_err(write_err)?,
            ..entry
        })
    }

    /// Entries matching `query`, newest first, at most one page
    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, AuditError> {
        let limit = query
            .limit
            .unwrap_or(self.page_size)
            .clamp(1, self.page_size);

        let rows: Vec<(i64, String, String, String)> = {
            let guard = db::lock(&self.conn)?;
            let mut stmt = guard
                .prepare(
                    "SELECT timestamp, action, intervention_id, details
                     FROM intervention_audit_log
                     WHERE (?1 IS NULL OR timestamp >= ?1)
                       AND (?2 IS NULL OR timestamp <= ?2)
                       AND (?3 IS NULL OR intervention_id = ?3)
                       AND (?4 IS NULL OR action = ?4)
                     ORDER BY timestamp DESC, rowid DESC
                     LIMIT ?5",
                )
                .map_err(StoreError::from)?;
            let rows = stmt
                .query_map(
                    params![
                        query.start.map(to_micros),
                        query.end.map(to_micros),
                        query.intervention_id.map(|id| id.to_string()),
                        query.action.map(|a| a.as_str()),
                        limit as i64,
                    ],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .map_err(StoreError::from)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(StoreError::from)?;
            rows
        };

        rows.into_iter()
            .map(|(timestamp, action, intervention_id, details)| {
                Ok(AuditLogEntry {
                    timestamp: from_micros(timestamp)?,
                    action: action
                        .parse::<AuditAction>()
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                    intervention_id: Uuid::parse_str(&intervention_id)
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                    details: serde_json::from_str(&details).map_err(StoreError::from)?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()
            .map_err(AuditError::from)
    }

    /// Whether an entry with `action` exists for the intervention
    pub async fn has_entry(&self, intervention_id: Uuid, action: AuditAction) -> Result<bool, AuditError> {
        let guard = db::lock(&self.conn)?;
        let count: i64 = guard
            .query_row(
                "SELECT COUNT(*) FROM intervention_audit_log
                 WHERE intervention_id = ?1 AND action = ?2",
                params![intervention_id.to_string(), action.as_str()],
                |row| row.get(0),
            )
            .map_err(StoreError::from)?;
        Ok(count > 0)
    }

    /// Number of entries that could not be persisted since startup
    pub fn failed_writes(&self) -> u64 {
        self.failed_writes.load(Ordering::Relaxed)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }
}
