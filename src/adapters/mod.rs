//! Adapter interfaces for external systems.
//!
//! The orchestrator acts on the organization through these collaborators:
//! the collaboration graph, the historical metrics store, calendars and
//! notifications. Production deployments plug in their own clients; the
//! `local` module provides SQLite-backed implementations used by the CLI and
//! the tests.

pub mod local;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::MetricsSnapshot;

pub use local::LocalWorkspace;

/// Service names used for per-service circuit breakers
pub const SERVICE_GRAPH: &str = "graph";
pub const SERVICE_CALENDAR: &str = "calendar";
pub const SERVICE_NOTIFICATIONS: &str = "notifications";
pub const SERVICE_METRICS: &str = "metrics";

/// Collaboration graph holding entity attributes and current metrics
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Latest metrics of an entity
    async fn read_entity_metrics(&self, entity_id: &str) -> Result<Option<MetricsSnapshot>>;

    /// Current value of an attribute (e.g. `manager_id`), if set
    async fn read_entity_field(&self, entity_id: &str, field: &str) -> Result<Option<Value>>;

    async fn write_entity_field(&self, entity_id: &str, field: &str, value: &Value) -> Result<()>;

    /// Remove an attribute entirely
    async fn clear_entity_field(&self, entity_id: &str, field: &str) -> Result<()>;
}

/// Time series of entity metrics
#[async_trait]
pub trait MetricsHistory: Send + Sync {
    /// Last snapshot recorded strictly before `timestamp`
    async fn read_metrics_before(
        &self,
        entity_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<MetricsSnapshot>>;

    /// Average of all snapshots recorded at or after `timestamp`
    async fn read_metrics_after(
        &self,
        entity_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<MetricsSnapshot>>;
}

/// A calendar entry created on behalf of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub event_id: String,
    pub entity_id: String,
    /// Correlates events with the intervention that created them
    pub tag: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[async_trait]
pub trait CalendarService: Send + Sync {
    /// Block focus time, returning the new event ID
    async fn create_focus_block(
        &self,
        entity_id: &str,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        tag: &str,
    ) -> Result<String>;

    /// Delete every event of the entity carrying `tag`, returning the count
    async fn delete_events_tagged(&self, entity_id: &str, tag: &str) -> Result<usize>;

    async fn list_events(&self, entity_id: &str) -> Result<Vec<CalendarEvent>>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a message, returning the notification ID
    async fn send(&self, entity_id: &str, message: &str) -> Result<String>;
}
