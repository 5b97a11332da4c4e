//! Durable intervention store.
//!
//! The store is the orchestrator's only source of truth for state. Every
//! mutation is a conditional update guarded by the expected prior status, so
//! each transition behaves like a compare-and-swap on `status`: when two
//! callers race on the same record exactly one update matches and the other
//! affects zero rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{ImpactLevel, InterventionKind, InterventionRecord, InterventionStatus};

use super::db::{self, from_micros, from_micros_opt, to_micros, SharedConnection};

/// Errors raised by the persistence layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt stored data: {0}")]
    Corrupt(String),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Field changes applied together with a status change.
///
/// Timestamps and payloads are only written if the column is still empty,
/// so each of them is set at most once.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub to: InterventionStatus,
    pub approved_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub rolled_back_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl Transition {
    pub fn to(status: InterventionStatus) -> Self {
        Self {
            to: status,
            approved_at: None,
            executed_at: None,
            rolled_back_at: None,
            result: None,
            error: None,
        }
    }

    pub fn approved_at(mut self, ts: DateTime<Utc>) -> Self {
        self.approved_at = Some(ts);
        self
    }

    pub fn executed_at(mut self, ts: DateTime<Utc>) -> Self {
        self.executed_at = Some(ts);
        self
    }

    pub fn rolled_back_at(mut self, ts: DateTime<Utc>) -> Self {
        self.rolled_back_at = Some(ts);
        self
    }

    pub fn result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Access contract the orchestrator requires from its persistence engine
#[async_trait]
pub trait InterventionStore: Send + Sync {
    /// Persist a newly proposed record
    async fn insert(&self, record: &InterventionRecord) -> Result<(), StoreError>;

    /// Load a record by ID
    async fn get(&self, id: Uuid) -> Result<Option<InterventionRecord>, StoreError>;

    /// All records in a status, oldest proposal first
    async fn list_by_status(
        &self,
        status: InterventionStatus,
    ) -> Result<Vec<InterventionRecord>, StoreError>;

    /// Apply `transition` only if the record is currently in `from`.
    ///
    /// Returns `false` when the guard did not match (a lost race or a stale
    /// read), which callers treat as a no-op.
    async fn transition(
        &self,
        id: Uuid,
        from: InterventionStatus,
        transition: Transition,
    ) -> Result<bool, StoreError>;

    /// Store the rollback snapshot of an approved record that has none yet.
    ///
    /// This doubles as the execution claim: only one caller can attach a
    /// snapshot, and only that caller may run the side effect.
    async fn attach_rollback_data(&self, id: Uuid, data: &Value) -> Result<bool, StoreError>;

    /// Atomically move every pending record proposed before `cutoff` to
    /// `TIMEOUT`, returning the IDs that were moved
    async fn expire_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;
}

/// SQLite implementation of [`InterventionStore`]
#[derive(Clone)]
pub struct SqliteInterventionStore {
    conn: SharedConnection,
}

const RECORD_COLUMNS: &str = "id, type, target_entity_id, params, reason, impact_level, status, \
     proposed_at, approved_at, executed_at, rolled_back_at, result, rollback_data, error";

impl SqliteInterventionStore {
    /// Wrap a connection, creating the schema if needed
    pub fn new(conn: SharedConnection) -> Result<Self, StoreError> {
        {
            let guard = db::lock(&conn)?;
            guard.execute_batch(
                "CREATE TABLE IF NOT EXISTS interventions (
                    id TEXT PRIMARY KEY,
                    type TEXT NOT NULL,
                    target_entity_id TEXT NOT NULL,
                    params TEXT NOT NULL,
                    reason TEXT NOT NULL,
                    impact_level TEXT NOT NULL,
                    status TEXT NOT NULL,
                    proposed_at INTEGER NOT NULL,
                    approved_at INTEGER,
                    executed_at INTEGER,
                    rolled_back_at INTEGER,
                    result TEXT,
                    rollback_data TEXT,
                    error TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_interventions_status
                    ON interventions(status, proposed_at);",
            )?;
        }
        Ok(Self { conn })
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
        Ok(RawRecord {
            id: row.get(0)?,
            kind: row.get(1)?,
            target_entity_id: row.get(2)?,
            params: row.get(3)?,
            reason: row.get(4)?,
            impact_level: row.get(5)?,
            status: row.get(6)?,
            proposed_at: row.get(7)?,
            approved_at: row.get(8)?,
            executed_at: row.get(9)?,
            rolled_back_at: row.get(10)?,
            result: row.get(11)?,
            rollback_data: row.get(12)?,
            error: row.get(13)?,
        })
    }
}

/// Row as stored, before parsing into domain types
struct RawRecord {
    id: String,
    kind: String,
    target_entity_id: String,
    params: String,
    reason: String,
    impact_level: String,
    status: String,
    proposed_at: i64,
    approved_at: Option<i64>,
    executed_at: Option<i64>,
    rolled_back_at: Option<i64>,
    result: Option<String>,
    rollback_data: Option<String>,
    error: Option<String>,
}

impl RawRecord {
    fn into_record(self) -> Result<InterventionRecord, StoreError> {
        let parse_json = |text: Option<String>| -> Result<Option<Value>, StoreError> {
            Ok(text.map(|t| serde_json::from_str(&t)).transpose()?)
        };

        Ok(InterventionRecord {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| StoreError::Corrupt(format!("bad id '{}': {}", self.id, e)))?,
            kind: InterventionKind::from(self.kind),
            target_entity_id: self.target_entity_id,
            params: serde_json::from_str(&self.params)?,
            reason: self.reason,
            impact_level: self
                .impact_level
                .parse::<ImpactLevel>()
                .map_err(|e| StoreError::Corrupt(format!("{}", e)))?,
            status: self
                .status
                .parse::<InterventionStatus>()
                .map_err(|e| StoreError::Corrupt(format!("{}", e)))?,
            proposed_at: from_micros(self.proposed_at)?,
            approved_at: from_micros_opt(self.approved_at)?,
            executed_at: from_micros_opt(self.executed_at)?,
            rolled_back_at: from_micros_opt(self.rolled_back_at)?,
            result: parse_json(self.result)?,
            rollback_data: parse_json(self.rollback_data)?,
            error: self.error,
        })
    }
}

#[async_trait]
impl InterventionStore for SqliteInterventionStore {
    async fn insert(&self, record: &InterventionRecord) -> Result<(), StoreError> {
        let params_json = serde_json::to_string(&record.params)?;
        let result_json = record.result.as_ref().map(serde_json::to_string).transpose()?;
        let rollback_json = record
            .rollback_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let guard = db::lock(&self.conn)?;
        guard.execute(
            "INSERT INTO interventions
             (id, type, target_entity_id, params, reason, impact_level, status,
              proposed_at, approved_at, executed_at, rolled_back_at, result, rollback_data, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                record.id.to_string(),
                record.kind.as_str(),
                record.target_entity_id,
                params_json,
                record.reason,
                record.impact_level.as_str(),
                record.status.as_str(),
                to_micros(record.proposed_at),
                record.approved_at.map(to_micros),
                record.executed_at.map(to_micros),
                record.rolled_back_at.map(to_micros),
                result_json,
                rollback_json,
                record.error,
            ],
        )?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<InterventionRecord>, StoreError> {
        let raw = {
            let guard = db::lock(&self.conn)?;
            guard
                .query_row(
                    &format!("SELECT {} FROM interventions WHERE id = ?1", RECORD_COLUMNS),
                    params![id.to_string()],
                    Self::row_to_record,
                )
                .optional()?
        };
        raw.map(RawRecord::into_record).transpose()
    }

    async fn list_by_status(
        &self,
        status: InterventionStatus,
    ) -> Result<Vec<InterventionRecord>, StoreError> {
        let rows = {
            let guard = db::lock(&self.conn)?;
            let mut stmt = guard.prepare(&format!(
                "SELECT {} FROM interventions WHERE status = ?1 ORDER BY proposed_at ASC, rowid ASC",
                RECORD_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![status.as_str()], Self::row_to_record)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        rows.into_iter().map(RawRecord::into_record).collect()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: InterventionStatus,
        transition: Transition,
    ) -> Result<bool, StoreError> {
        let result_json = transition
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let guard = db::lock(&self.conn)?;
        let changed = guard.execute(
            "UPDATE interventions SET
                status = ?1,
                approved_at = COALESCE(approved_at, ?2),
                executed_at = COALESCE(executed_at, ?3),
                rolled_back_at = COALESCE(rolled_back_at, ?4),
                result = COALESCE(result, ?5),
                error = COALESCE(error, ?6)
             WHERE id = ?7 AND status = ?8",
            params![
                transition.to.as_str(),
                transition.approved_at.map(to_micros),
                transition.executed_at.map(to_micros),
                transition.rolled_back_at.map(to_micros),
                result_json,
                transition.error,
                id.to_string(),
                from.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    async fn attach_rollback_data(&self, id: Uuid, data: &Value) -> Result<bool, StoreError> {
        let json = serde_json::to_string(data)?;

        let guard = db::lock(&self.conn)?;
        let changed = guard.execute(
            "UPDATE interventions SET rollback_data = ?1
             WHERE id = ?2 AND status = ?3 AND rollback_data IS NULL",
            params![json, id.to_string(), InterventionStatus::Approved.as_str()],
        )?;
        Ok(changed == 1)
    }

    async fn expire_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<String> = {
            let guard = db::lock(&self.conn)?;
            let mut stmt = guard.prepare(
                "UPDATE interventions SET status = ?1
                 WHERE status = ?2 AND proposed_at < ?3
                 RETURNING id",
            )?;
            let ids = stmt
                .query_map(
                    params![
                        InterventionStatus::Timeout.as_str(),
                        InterventionStatus::PendingApproval.as_str(),
                        to_micros(cutoff),
                    ],
                    |row| row.get(0),
                )?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        ids.iter()
            .map(|id| {
                Uuid::parse_str(id)
                    .map_err(|e| StoreError::Corrupt(format!("bad id '{}': {}", id, e)))
            })
            .collect()
    }
}
