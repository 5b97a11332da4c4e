//! Audit log entries.
//!
//! Every lifecycle transition is recorded as an immutable entry. Entries are
//! never updated or deleted.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::intervention::UnknownVariant;

/// A single entry in the append-only audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// When the event was recorded (microsecond precision)
    pub timestamp: DateTime<Utc>,

    /// Event name
    pub action: AuditAction,

    /// The intervention this entry belongs to
    pub intervention_id: Uuid,

    /// Free-form structured payload
    pub details: Value,
}

impl AuditLogEntry {
    /// Create a new entry stamped with the current time
    pub fn new(action: AuditAction, intervention_id: Uuid, details: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            intervention_id,
            details,
        }
    }
}

/// Lifecycle events that are audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    InterventionProposed,
    InterventionApproved,
    InterventionRejected,
    InterventionTimeout,
    InterventionExecuted,
    InterventionFailed,
    InterventionRolledBack,
    RollbackFailed,
    OutcomeChecked,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InterventionProposed => "intervention_proposed",
            Self::InterventionApproved => "intervention_approved",
            Self::InterventionRejected => "intervention_rejected",
            Self::InterventionTimeout => "intervention_timeout",
            Self::InterventionExecuted => "intervention_executed",
            Self::InterventionFailed => "intervention_failed",
            Self::InterventionRolledBack => "intervention_rolled_back",
            Self::RollbackFailed => "rollback_failed",
            Self::OutcomeChecked => "outcome_checked",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intervention_proposed" => Ok(Self::InterventionProposed),
            "intervention_approved" => Ok(Self::InterventionApproved),
            "intervention_rejected" => Ok(Self::InterventionRejected),
            "intervention_timeout" => Ok(Self::InterventionTimeout),
            "intervention_executed" => Ok(Self::InterventionExecuted),
            "intervention_failed" => Ok(Self::InterventionFailed),
            "intervention_rolled_back" => Ok(Self::InterventionRolledBack),
            "rollback_failed" => Ok(Self::RollbackFailed),
            "outcome_checked" => Ok(Self::OutcomeChecked),
            other => Err(UnknownVariant {
                what: "audit action",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names_match_serde() {
        for action in [
            AuditAction::InterventionProposed,
            AuditAction::InterventionRolledBack,
            AuditAction::RollbackFailed,
            AuditAction::OutcomeChecked,
        ] {
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.as_str()));
            assert_eq!(action.as_str().parse::<AuditAction>().unwrap(), action);
        }
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        assert!("intervention_deleted".parse::<AuditAction>().is_err());
    }
}
