//! State capture, execution and restore per intervention kind.
//!
//! Each known kind is served by a handler registered in a
//! [`HandlerRegistry`]. A handler captures a [`RollbackData`] snapshot before
//! the side effect runs, performs the side effect, and can restore the
//! snapshot later. A snapshot holds everything its restore needs; restore
//! never consults the intervention record or any other mutable state.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapters::{
    CalendarService, GraphStore, Notifier, SERVICE_CALENDAR, SERVICE_GRAPH, SERVICE_NOTIFICATIONS,
};
use crate::domain::{InterventionAction, InterventionKind};

/// Graph attribute holding an entity's workload (hours per week)
pub const FIELD_WORKLOAD: &str = "workload";

/// Restorable pre-execution state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RollbackData {
    /// Prior values of graph attributes
    FieldValues { fields: Vec<FieldSnapshot> },

    /// Calendar events created under `tag` for `entity_id`
    CalendarBlocks { entity_id: String, tag: String },

    /// The effect cannot be undone (e.g. a delivered message)
    Irreversible { note: String },
}

/// One graph attribute as it was before execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSnapshot {
    pub entity_id: String,
    pub field: String,
    /// `None` if the attribute was not set
    pub prior: Option<Value>,
}

impl RollbackData {
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).context("Failed to serialize rollback data")
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).context("Failed to parse rollback data")
    }
}

/// What a handler is asked to act on
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub intervention_id: Uuid,
    pub target_entity_id: &'a str,
    pub action: &'a InterventionAction,
}

/// Capture, execute and restore for one or more intervention kinds
#[async_trait]
pub trait InterventionHandler: Send + Sync {
    /// Downstream service the side effect goes through (circuit breaker key)
    fn service(&self) -> &'static str;

    /// Snapshot everything `restore` needs to undo `execute`
    async fn capture(&self, ctx: &ActionContext<'_>) -> Result<RollbackData>;

    /// Perform the side effect, returning a structured result
    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<Value>;

    /// Undo the side effect from the snapshot alone
    async fn restore(&self, snapshot: &RollbackData) -> Result<Value>;
}

/// Strategy map from intervention kind to handler
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<InterventionKind, Arc<dyn InterventionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handlers for every known kind, wired to the given collaborators
    pub fn standard(
        graph: Arc<dyn GraphStore>,
        calendar: Arc<dyn CalendarService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let mut registry = Self::new();

        for kind in [
            InterventionKind::ReassignManager,
            InterventionKind::TransferTeam,
            InterventionKind::ChangeRole,
            InterventionKind::AdjustCompensation,
            InterventionKind::CapMeetingHours,
        ] {
            registry.register(kind, Arc::new(FieldChangeHandler::new(graph.clone())));
        }
        registry.register(
            InterventionKind::RedistributeWorkload,
            Arc::new(WorkloadHandler::new(graph)),
        );
        registry.register(
            InterventionKind::ScheduleFocusTime,
            Arc::new(FocusTimeHandler::new(calendar)),
        );

        let notifications: Arc<dyn InterventionHandler> = Arc::new(NotificationHandler::new(notifier));
        registry.register(InterventionKind::SendRecognition, notifications.clone());
        registry.register(InterventionKind::SendNudge, notifications);

        registry
    }

    pub fn register(&mut self, kind: InterventionKind, handler: Arc<dyn InterventionHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: &InterventionKind) -> Option<Arc<dyn InterventionHandler>> {
        self.handlers.get(kind).cloned()
    }

    /// Known kinds without a handler (empty for a `standard` registry)
    pub fn missing_known_kinds(&self) -> Vec<InterventionKind> {
        InterventionKind::KNOWN
            .into_iter()
            .filter(|k| !self.handlers.contains_key(k))
            .collect()
    }
}

/// Graph attribute changed by a single-field intervention, and its new value
fn field_change(action: &InterventionAction) -> Option<(&'static str, Value)> {
    match action {
        InterventionAction::ReassignManager { new_manager_id } => {
            Some(("manager_id", json!(new_manager_id)))
        }
        InterventionAction::TransferTeam { new_team_id } => Some(("team_id", json!(new_team_id))),
        InterventionAction::ChangeRole { new_role } => Some(("role", json!(new_role))),
        InterventionAction::AdjustCompensation { new_band } => {
            Some(("compensation_band", json!(new_band)))
        }
        InterventionAction::CapMeetingHours { weekly_hours } => {
            Some(("meeting_hours_cap", json!(weekly_hours)))
        }
        _ => None,
    }
}

/// Write back prior attribute values; unset attributes are cleared
async fn restore_fields(graph: &dyn GraphStore, fields: &[FieldSnapshot]) -> Result<Value> {
    for snapshot in fields {
        match &snapshot.prior {
            Some(value) => {
                graph
                    .write_entity_field(&snapshot.entity_id, &snapshot.field, value)
                    .await?
            }
            None => {
                graph
                    .clear_entity_field(&snapshot.entity_id, &snapshot.field)
                    .await?
            }
        }
        debug!(entity = %snapshot.entity_id, field = %snapshot.field, "Restored field");
    }
    Ok(json!({ "restored_fields": fields.len() }))
}

fn unexpected(snapshot: &RollbackData, handler: &str) -> anyhow::Error {
    anyhow::anyhow!("{} handler cannot restore snapshot {:?}", handler, snapshot)
}

/// Sets one graph attribute (manager, team, role, compensation band,
/// meeting-hour cap)
pub struct FieldChangeHandler {
    graph: Arc<dyn GraphStore>,
}

impl FieldChangeHandler {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl InterventionHandler for FieldChangeHandler {
    fn service(&self) -> &'static str {
        SERVICE_GRAPH
    }

    async fn capture(&self, ctx: &ActionContext<'_>) -> Result<RollbackData> {
        let Some((field, _)) = field_change(ctx.action) else {
            bail!("{:?} is not a field change", ctx.action.kind());
        };
        let prior = self.graph.read_entity_field(ctx.target_entity_id, field).await?;
        Ok(RollbackData::FieldValues {
            fields: vec![FieldSnapshot {
                entity_id: ctx.target_entity_id.to_string(),
                field: field.to_string(),
                prior,
            }],
        })
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<Value> {
        let Some((field, value)) = field_change(ctx.action) else {
            bail!("{:?} is not a field change", ctx.action.kind());
        };
        self.graph
            .write_entity_field(ctx.target_entity_id, field, &value)
            .await?;
        Ok(json!({
            "entity_id": ctx.target_entity_id,
            "field": field,
            "value": value,
        }))
    }

    async fn restore(&self, snapshot: &RollbackData) -> Result<Value> {
        match snapshot {
            RollbackData::FieldValues { fields } => restore_fields(self.graph.as_ref(), fields).await,
            other => Err(unexpected(other, "field change")),
        }
    }
}

/// Moves a share of the target's workload to a recipient
pub struct WorkloadHandler {
    graph: Arc<dyn GraphStore>,
}

impl WorkloadHandler {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    async fn workload(&self, entity_id: &str) -> Result<Option<f64>> {
        match self.graph.read_entity_field(entity_id, FIELD_WORKLOAD).await? {
            None => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .with_context(|| format!("Workload of {} is not a number: {}", entity_id, value)),
        }
    }
}

#[async_trait]
impl InterventionHandler for WorkloadHandler {
    fn service(&self) -> &'static str {
        SERVICE_GRAPH
    }

    async fn capture(&self, ctx: &ActionContext<'_>) -> Result<RollbackData> {
        let InterventionAction::RedistributeWorkload { recipient_id, .. } = ctx.action else {
            bail!("{:?} is not a workload redistribution", ctx.action.kind());
        };

        let mut fields = Vec::with_capacity(2);
        for entity in [ctx.target_entity_id, recipient_id.as_str()] {
            fields.push(FieldSnapshot {
                entity_id: entity.to_string(),
                field: FIELD_WORKLOAD.to_string(),
                prior: self.graph.read_entity_field(entity, FIELD_WORKLOAD).await?,
            });
        }
        Ok(RollbackData::FieldValues { fields })
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<Value> {
        let InterventionAction::RedistributeWorkload { recipient_id, share } = ctx.action else {
            bail!("{:?} is not a workload redistribution", ctx.action.kind());
        };
        if recipient_id == ctx.target_entity_id {
            bail!("Cannot redistribute workload of {} to itself", recipient_id);
        }

        let source = self
            .workload(ctx.target_entity_id)
            .await?
            .with_context(|| format!("No workload recorded for {}", ctx.target_entity_id))?;
        let recipient = self.workload(recipient_id).await?.unwrap_or(0.0);
        let moved = source * share;

        self.graph
            .write_entity_field(ctx.target_entity_id, FIELD_WORKLOAD, &json!(source - moved))
            .await?;
        self.graph
            .write_entity_field(recipient_id, FIELD_WORKLOAD, &json!(recipient + moved))
            .await?;

        Ok(json!({
            "moved": moved,
            "from": ctx.target_entity_id,
            "to": recipient_id,
        }))
    }

    async fn restore(&self, snapshot: &RollbackData) -> Result<Value> {
        match snapshot {
            RollbackData::FieldValues { fields } => restore_fields(self.graph.as_ref(), fields).await,
            other => Err(unexpected(other, "workload")),
        }
    }
}

/// Books recurring focus-time blocks tagged with the intervention ID
pub struct FocusTimeHandler {
    calendar: Arc<dyn CalendarService>,
}

impl FocusTimeHandler {
    pub fn new(calendar: Arc<dyn CalendarService>) -> Self {
        Self { calendar }
    }
}

#[async_trait]
impl InterventionHandler for FocusTimeHandler {
    fn service(&self) -> &'static str {
        SERVICE_CALENDAR
    }

    async fn capture(&self, ctx: &ActionContext<'_>) -> Result<RollbackData> {
        Ok(RollbackData::CalendarBlocks {
            entity_id: ctx.target_entity_id.to_string(),
            tag: ctx.intervention_id.to_string(),
        })
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<Value> {
        let InterventionAction::ScheduleFocusTime {
            start,
            duration_minutes,
            occurrences,
        } = ctx.action
        else {
            bail!("{:?} is not a focus-time booking", ctx.action.kind());
        };

        let tag = ctx.intervention_id.to_string();
        let mut event_ids = Vec::with_capacity(*occurrences as usize);
        for day in 0..*occurrences {
            let starts_at = *start + Duration::days(i64::from(day));
            let ends_at = starts_at + Duration::minutes(i64::from(*duration_minutes));
            let event_id = self
                .calendar
                .create_focus_block(ctx.target_entity_id, starts_at, ends_at, &tag)
                .await?;
            event_ids.push(event_id);
        }

        Ok(json!({ "event_ids": event_ids }))
    }

    async fn restore(&self, snapshot: &RollbackData) -> Result<Value> {
        match snapshot {
            RollbackData::CalendarBlocks { entity_id, tag } => {
                let deleted = self.calendar.delete_events_tagged(entity_id, tag).await?;
                Ok(json!({ "deleted_events": deleted }))
            }
            other => Err(unexpected(other, "focus time")),
        }
    }
}

/// Sends recognition messages and nudges
pub struct NotificationHandler {
    notifier: Arc<dyn Notifier>,
}

impl NotificationHandler {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl InterventionHandler for NotificationHandler {
    fn service(&self) -> &'static str {
        SERVICE_NOTIFICATIONS
    }

    async fn capture(&self, _ctx: &ActionContext<'_>) -> Result<RollbackData> {
        Ok(RollbackData::Irreversible {
            note: "delivered notifications cannot be recalled".to_string(),
        })
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<Value> {
        let message = match ctx.action {
            InterventionAction::SendRecognition { message }
            | InterventionAction::SendNudge { message } => message,
            other => bail!("{:?} is not a notification", other.kind()),
        };
        let notification_id = self.notifier.send(ctx.target_entity_id, message).await?;
        Ok(json!({ "notification_id": notification_id }))
    }

    async fn restore(&self, snapshot: &RollbackData) -> Result<Value> {
        match snapshot {
            RollbackData::Irreversible { note } => {
                warn!(%note, "Rollback of irreversible effect recorded without changes");
                Ok(json!({ "restored": false, "note": note }))
            }
            other => Err(unexpected(other, "notification")),
        }
    }
}
