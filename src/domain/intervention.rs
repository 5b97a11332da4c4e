//! Intervention records and their typed parameters.
//!
//! An intervention is stored generically (a `type` tag plus a JSON payload)
//! but every known kind has a typed parameter shape in [`InterventionAction`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Severity tier deciding whether a human has to sign off
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
}

impl ImpactLevel {
    /// Only high impact interventions wait for a human
    pub fn requires_approval(self) -> bool {
        matches!(self, Self::High)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ImpactLevel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            other => Err(UnknownVariant::new("impact level", other)),
        }
    }
}

/// Lifecycle status of an intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterventionStatus {
    /// Waiting for a human decision
    PendingApproval,

    /// Approved (manually or automatically), not yet executed
    Approved,

    /// Side effect applied; can still be rolled back
    Executed,

    /// Rejected, or execution failed
    Failed,

    /// Side effect undone
    RolledBack,

    /// Approval window elapsed without a decision
    Timeout,
}

impl InterventionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::Approved => "APPROVED",
            Self::Executed => "EXECUTED",
            Self::Failed => "FAILED",
            Self::RolledBack => "ROLLED_BACK",
            Self::Timeout => "TIMEOUT",
        }
    }

    /// Terminal states never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::RolledBack | Self::Timeout)
    }

    /// Whether the state machine has an edge from `self` to `next`
    pub fn can_transition_to(self, next: Self) -> bool {
        use InterventionStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (PendingApproval, Approved)
                | (PendingApproval, Failed)
                | (PendingApproval, Timeout)
                | (Approved, Executed)
                | (Approved, Failed)
                | (Executed, RolledBack)
        )
    }
}

impl fmt::Display for InterventionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for InterventionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_APPROVAL" => Ok(Self::PendingApproval),
            "APPROVED" => Ok(Self::Approved),
            "EXECUTED" => Ok(Self::Executed),
            "FAILED" => Ok(Self::Failed),
            "ROLLED_BACK" => Ok(Self::RolledBack),
            "TIMEOUT" => Ok(Self::Timeout),
            other => Err(UnknownVariant::new("status", other)),
        }
    }
}

/// A stored string that does not name a known variant
#[derive(Debug, Clone, Error)]
#[error("unknown {what}: {value}")]
pub struct UnknownVariant {
    pub what: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}

/// The `type` tag of an intervention.
///
/// Unrecognized tags are kept verbatim in `Unknown` so that they can still be
/// stored, classified and audited.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InterventionKind {
    ReassignManager,
    TransferTeam,
    ChangeRole,
    AdjustCompensation,
    ScheduleFocusTime,
    RedistributeWorkload,
    CapMeetingHours,
    SendRecognition,
    SendNudge,
    Unknown(String),
}

impl InterventionKind {
    /// All kinds with a typed parameter shape
    pub const KNOWN: [InterventionKind; 9] = [
        Self::ReassignManager,
        Self::TransferTeam,
        Self::ChangeRole,
        Self::AdjustCompensation,
        Self::ScheduleFocusTime,
        Self::RedistributeWorkload,
        Self::CapMeetingHours,
        Self::SendRecognition,
        Self::SendNudge,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::ReassignManager => "reassign_manager",
            Self::TransferTeam => "transfer_team",
            Self::ChangeRole => "change_role",
            Self::AdjustCompensation => "adjust_compensation",
            Self::ScheduleFocusTime => "schedule_focus_time",
            Self::RedistributeWorkload => "redistribute_workload",
            Self::CapMeetingHours => "cap_meeting_hours",
            Self::SendRecognition => "send_recognition",
            Self::SendNudge => "send_nudge",
            Self::Unknown(tag) => tag,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<&str> for InterventionKind {
    fn from(tag: &str) -> Self {
        match tag {
            "reassign_manager" => Self::ReassignManager,
            "transfer_team" => Self::TransferTeam,
            "change_role" => Self::ChangeRole,
            "adjust_compensation" => Self::AdjustCompensation,
            "schedule_focus_time" => Self::ScheduleFocusTime,
            "redistribute_workload" => Self::RedistributeWorkload,
            "cap_meeting_hours" => Self::CapMeetingHours,
            "send_recognition" => Self::SendRecognition,
            "send_nudge" => Self::SendNudge,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<String> for InterventionKind {
    fn from(tag: String) -> Self {
        Self::from(tag.as_str())
    }
}

impl From<InterventionKind> for String {
    fn from(kind: InterventionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for InterventionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Typed parameters for every known intervention kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum InterventionAction {
    ReassignManager {
        new_manager_id: String,
    },
    TransferTeam {
        new_team_id: String,
    },
    ChangeRole {
        new_role: String,
    },
    AdjustCompensation {
        new_band: String,
    },
    ScheduleFocusTime {
        start: DateTime<Utc>,
        duration_minutes: u32,
        /// Number of consecutive daily blocks
        #[serde(default = "default_occurrences")]
        occurrences: u32,
    },
    RedistributeWorkload {
        recipient_id: String,
        /// Fraction of the target's workload moved to the recipient (0, 1]
        share: f64,
    },
    CapMeetingHours {
        weekly_hours: f64,
    },
    SendRecognition {
        message: String,
    },
    SendNudge {
        message: String,
    },
}

fn default_occurrences() -> u32 {
    1
}

/// Parameters that do not fit the declared kind
#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("invalid params for '{kind}': {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid params for '{kind}': {reason}")]
    OutOfRange { kind: String, reason: String },

    #[error("target entity id must not be empty")]
    EmptyTarget,
}

impl InterventionAction {
    /// Parse the generic payload of a record into its typed form.
    ///
    /// Returns `Ok(None)` for unknown kinds, which carry no typed shape.
    pub fn parse(kind: &InterventionKind, params: &Value) -> Result<Option<Self>, ParamsError> {
        if !kind.is_known() {
            return Ok(None);
        }

        let tagged = serde_json::json!({ "type": kind.as_str(), "params": params });
        let action: Self =
            serde_json::from_value(tagged).map_err(|source| ParamsError::Malformed {
                kind: kind.to_string(),
                source,
            })?;
        action.validate()?;
        Ok(Some(action))
    }

    pub fn kind(&self) -> InterventionKind {
        match self {
            Self::ReassignManager { .. } => InterventionKind::ReassignManager,
            Self::TransferTeam { .. } => InterventionKind::TransferTeam,
            Self::ChangeRole { .. } => InterventionKind::ChangeRole,
            Self::AdjustCompensation { .. } => InterventionKind::AdjustCompensation,
            Self::ScheduleFocusTime { .. } => InterventionKind::ScheduleFocusTime,
            Self::RedistributeWorkload { .. } => InterventionKind::RedistributeWorkload,
            Self::CapMeetingHours { .. } => InterventionKind::CapMeetingHours,
            Self::SendRecognition { .. } => InterventionKind::SendRecognition,
            Self::SendNudge { .. } => InterventionKind::SendNudge,
        }
    }

    fn validate(&self) -> Result<(), ParamsError> {
        let out_of_range = |reason: &str| ParamsError::OutOfRange {
            kind: self.kind().to_string(),
            reason: reason.to_string(),
        };

        match self {
            Self::ScheduleFocusTime {
                duration_minutes,
                occurrences,
                ..
            } => {
                if *duration_minutes == 0 || *duration_minutes > 8 * 60 {
                    return Err(out_of_range("duration_minutes must be within 1..=480"));
                }
                if *occurrences == 0 || *occurrences > 31 {
                    return Err(out_of_range("occurrences must be within 1..=31"));
                }
            }
            Self::RedistributeWorkload { share, .. } => {
                if !(*share > 0.0 && *share <= 1.0) {
                    return Err(out_of_range("share must be within (0, 1]"));
                }
            }
            Self::CapMeetingHours { weekly_hours } => {
                if !(weekly_hours.is_finite() && *weekly_hours >= 0.0) {
                    return Err(out_of_range("weekly_hours must be a non-negative number"));
                }
            }
            _ => {}
        }

        Ok(())
    }
}

/// The central persisted entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionRecord {
    /// Assigned at proposal time, never changes
    pub id: Uuid,

    /// Selects classification and execution/rollback behavior
    #[serde(rename = "type")]
    pub kind: InterventionKind,

    /// Subject of the action (e.g. an employee identifier)
    pub target_entity_id: String,

    /// Kind-specific payload, see [`InterventionAction`]
    pub params: Value,

    /// Justification supplied by the proposer
    pub reason: String,

    /// Assigned once at proposal
    pub impact_level: ImpactLevel,

    pub status: InterventionStatus,

    pub proposed_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub rolled_back_at: Option<DateTime<Utc>>,

    /// Present only after successful execution
    pub result: Option<Value>,

    /// Snapshot captured right before the side effect
    pub rollback_data: Option<Value>,

    /// Execution error or rejection reason
    pub error: Option<String>,
}

impl InterventionRecord {
    /// Build a freshly proposed record.
    ///
    /// High impact records start in `PENDING_APPROVAL`; everything else is
    /// auto-approved at proposal time.
    pub fn propose(
        kind: InterventionKind,
        target_entity_id: String,
        params: Value,
        reason: String,
        impact_level: ImpactLevel,
    ) -> Self {
        let now = Utc::now();
        let (status, approved_at) = if impact_level.requires_approval() {
            (InterventionStatus::PendingApproval, None)
        } else {
            (InterventionStatus::Approved, Some(now))
        };

        Self {
            id: Uuid::new_v4(),
            kind,
            target_entity_id,
            params,
            reason,
            impact_level,
            status,
            proposed_at: now,
            approved_at,
            executed_at: None,
            rolled_back_at: None,
            result: None,
            rollback_data: None,
            error: None,
        }
    }

    /// Typed view of `params`
    pub fn action(&self) -> Result<Option<InterventionAction>, ParamsError> {
        InterventionAction::parse(&self.kind, &self.params)
    }

    /// Approved with a snapshot attached but not yet executed: an execution
    /// is in flight, or its process died before finishing
    pub fn has_unfinished_execution(&self) -> bool {
        self.status == InterventionStatus::Approved && self.rollback_data.is_some()
    }
}
