//! SQLite-backed local collaborators.
//!
//! Keeps entity attributes, metric samples, calendar events and sent
//! notifications in the same database as the interventions, so the CLI can
//! run the full lifecycle on one machine.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use crate::core::db::{self, from_micros, to_micros, SharedConnection};
use crate::domain::MetricsSnapshot;

use super::{CalendarEvent, CalendarService, GraphStore, MetricsHistory, Notifier};

/// Local implementation of every collaborator trait
#[derive(Clone)]
pub struct LocalWorkspace {
    conn: SharedConnection,
}

impl LocalWorkspace {
    /// Wrap a connection, creating the collaborator tables if needed
    pub fn new(conn: SharedConnection) -> Result<Self> {
        {
            let guard = db::lock(&conn)?;
            guard
                .execute_batch(
                    "CREATE TABLE IF NOT EXISTS entity_fields (
                        entity_id TEXT NOT NULL,
                        field TEXT NOT NULL,
                        value TEXT NOT NULL,
                        PRIMARY KEY (entity_id, field)
                    );
                    CREATE TABLE IF NOT EXISTS entity_metrics (
                        entity_id TEXT NOT NULL,
                        recorded_at INTEGER NOT NULL,
                        centrality REAL NOT NULL,
                        burnout_score REAL NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_entity_metrics
                        ON entity_metrics(entity_id, recorded_at);
                    CREATE TABLE IF NOT EXISTS calendar_events (
                        event_id TEXT PRIMARY KEY,
                        entity_id TEXT NOT NULL,
                        tag TEXT NOT NULL,
                        starts_at INTEGER NOT NULL,
                        ends_at INTEGER NOT NULL
                    );
                    CREATE TABLE IF NOT EXISTS notifications (
                        notification_id TEXT PRIMARY KEY,
                        entity_id TEXT NOT NULL,
                        message TEXT NOT NULL,
                        sent_at INTEGER NOT NULL
                    );",
                )
                .context("Failed to create workspace tables")?;
        }
        Ok(Self { conn })
    }

    /// Record a metrics sample for an entity
    pub async fn record_metrics(&self, entity_id: &str, snapshot: MetricsSnapshot) -> Result<()> {
        let guard = db::lock(&self.conn)?;
        guard
            .execute(
                "INSERT INTO entity_metrics (entity_id, recorded_at, centrality, burnout_score)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    entity_id,
                    to_micros(snapshot.recorded_at),
                    snapshot.centrality,
                    snapshot.burnout_score
                ],
            )
            .with_context(|| format!("Failed to record metrics for {}", entity_id))?;
        Ok(())
    }

    /// Messages sent to an entity, oldest first
    pub async fn sent_notifications(&self, entity_id: &str) -> Result<Vec<String>> {
        let guard = db::lock(&self.conn)?;
        let mut stmt = guard.prepare(
            "SELECT message FROM notifications WHERE entity_id = ?1 ORDER BY sent_at, rowid",
        )?;
        let messages = stmt
            .query_map(params![entity_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(messages)
    }

    fn snapshot_from_row(centrality: f64, burnout: f64, micros: i64) -> Result<MetricsSnapshot> {
        Ok(MetricsSnapshot {
            centrality,
            burnout_score: burnout,
            recorded_at: from_micros(micros)?,
        })
    }
}

#[async_trait]
impl GraphStore for LocalWorkspace {
    async fn read_entity_metrics(&self, entity_id: &str) -> Result<Option<MetricsSnapshot>> {
        let row: Option<(f64, f64, i64)> = {
            let guard = db::lock(&self.conn)?;
            guard
                .query_row(
                    "SELECT centrality, burnout_score, recorded_at FROM entity_metrics
                     WHERE entity_id = ?1 ORDER BY recorded_at DESC, rowid DESC LIMIT 1",
                    params![entity_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?
        };
        row.map(|(c, b, t)| Self::snapshot_from_row(c, b, t)).transpose()
    }

    async fn read_entity_field(&self, entity_id: &str, field: &str) -> Result<Option<Value>> {
        let text: Option<String> = {
            let guard = db::lock(&self.conn)?;
            guard
                .query_row(
                    "SELECT value FROM entity_fields WHERE entity_id = ?1 AND field = ?2",
                    params![entity_id, field],
                    |row| row.get(0),
                )
                .optional()?
        };
        text.map(|t| serde_json::from_str(&t).context("Corrupt entity field value"))
            .transpose()
    }

    async fn write_entity_field(&self, entity_id: &str, field: &str, value: &Value) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let guard = db::lock(&self.conn)?;
        guard
            .execute(
                "INSERT INTO entity_fields (entity_id, field, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(entity_id, field) DO UPDATE SET value = excluded.value",
                params![entity_id, field, json],
            )
            .with_context(|| format!("Failed to write {}.{}", entity_id, field))?;
        Ok(())
    }

    async fn clear_entity_field(&self, entity_id: &str, field: &str) -> Result<()> {
        let guard = db::lock(&self.conn)?;
        guard.execute(
            "DELETE FROM entity_fields WHERE entity_id = ?1 AND field = ?2",
            params![entity_id, field],
        )?;
        Ok(())
    }
}

#[async_trait]
impl MetricsHistory for LocalWorkspace {
    async fn read_metrics_before(
        &self,
        entity_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<MetricsSnapshot>> {
        let row: Option<(f64, f64, i64)> = {
            let guard = db::lock(&self.conn)?;
            guard
                .query_row(
                    "SELECT centrality, burnout_score, recorded_at FROM entity_metrics
                     WHERE entity_id = ?1 AND recorded_at < ?2
                     ORDER BY recorded_at DESC, rowid DESC LIMIT 1",
                    params![entity_id, to_micros(timestamp)],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?
        };
        row.map(|(c, b, t)| Self::snapshot_from_row(c, b, t)).transpose()
    }

    async fn read_metrics_after(
        &self,
        entity_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<MetricsSnapshot>> {
        let (count, centrality, burnout, latest): (i64, Option<f64>, Option<f64>, Option<i64>) = {
            let guard = db::lock(&self.conn)?;
            guard.query_row(
                "SELECT COUNT(*), AVG(centrality), AVG(burnout_score), MAX(recorded_at)
                 FROM entity_metrics WHERE entity_id = ?1 AND recorded_at >= ?2",
                params![entity_id, to_micros(timestamp)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?
        };

        match (count, centrality, burnout, latest) {
            (n, Some(c), Some(b), Some(t)) if n > 0 => Ok(Some(Self::snapshot_from_row(c, b, t)?)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl CalendarService for LocalWorkspace {
    async fn create_focus_block(
        &self,
        entity_id: &str,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        tag: &str,
    ) -> Result<String> {
        let event_id = format!("evt_{}", Uuid::new_v4().simple());
        let guard = db::lock(&self.conn)?;
        guard
            .execute(
                "INSERT INTO calendar_events (event_id, entity_id, tag, starts_at, ends_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![event_id, entity_id, tag, to_micros(starts_at), to_micros(ends_at)],
            )
            .with_context(|| format!("Failed to create focus block for {}", entity_id))?;
        Ok(event_id)
    }

    async fn delete_events_tagged(&self, entity_id: &str, tag: &str) -> Result<usize> {
        let guard = db::lock(&self.conn)?;
        let deleted = guard.execute(
            "DELETE FROM calendar_events WHERE entity_id = ?1 AND tag = ?2",
            params![entity_id, tag],
        )?;
        Ok(deleted)
    }

    async fn list_events(&self, entity_id: &str) -> Result<Vec<CalendarEvent>> {
        let rows: Vec<(String, String, String, i64, i64)> = {
            let guard = db::lock(&self.conn)?;
            let mut stmt = guard.prepare(
                "SELECT event_id, entity_id, tag, starts_at, ends_at FROM calendar_events
                 WHERE entity_id = ?1 ORDER BY starts_at",
            )?;
            let rows = stmt
                .query_map(params![entity_id], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter()
            .map(|(event_id, entity_id, tag, starts, ends)| {
                Ok(CalendarEvent {
                    event_id,
                    entity_id,
                    tag,
                    starts_at: from_micros(starts)?,
                    ends_at: from_micros(ends)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Notifier for LocalWorkspace {
    async fn send(&self, entity_id: &str, message: &str) -> Result<String> {
        let notification_id = format!("ntf_{}", Uuid::new_v4().simple());
        let guard = db::lock(&self.conn)?;
        guard.execute(
            "INSERT INTO notifications (notification_id, entity_id, message, sent_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![notification_id, entity_id, message, to_micros(Utc::now())],
        )?;
        Ok(notification_id)
    }
}
