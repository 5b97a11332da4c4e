//! Orchestrator error taxonomy.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{InterventionStatus, ParamsError};

use super::audit_log::AuditError;
use super::store::StoreError;

/// Errors surfaced by orchestrator operations
#[derive(Debug, Error)]
pub enum InterventionError {
    #[error("Intervention not found: {0}")]
    NotFound(Uuid),

    /// The record is not in a state that allows the operation, or another
    /// caller moved it first
    #[error("Cannot {operation} intervention {id}: status is {status}")]
    InvalidStateTransition {
        id: Uuid,
        status: InterventionStatus,
        operation: &'static str,
    },

    /// The approval window elapsed before approval; the record is now TIMEOUT
    #[error("Approval window for intervention {0} has expired")]
    ApprovalExpired(Uuid),

    #[error("Invalid parameters: {0}")]
    InvalidParams(#[from] ParamsError),

    #[error("Execution of intervention {id} failed: {reason}")]
    ExecutionFailure { id: Uuid, reason: String },

    /// Restore failed; the record stays EXECUTED
    #[error("Rollback of intervention {id} failed: {reason}")]
    RestoreFailure { id: Uuid, reason: String },

    #[error("Circuit open for service '{service}'")]
    CircuitOpen { service: String },

    #[error("Intervention {0} has no rollback data")]
    MissingRollbackData(Uuid),

    #[error("Metrics for intervention {id} unavailable: {reason}")]
    MetricsUnavailable { id: Uuid, reason: String },

    /// From a direct [`AuditLog::append`](super::audit_log::AuditLog::append);
    /// lifecycle operations hand write failures to the alert sink instead
    #[error("Audit write failed: {0}")]
    AuditWriteFailure(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Stable error codes for API and UI layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    InvalidStateTransition,
    ApprovalExpired,
    InvalidParams,
    ExecutionFailure,
    RestoreFailure,
    CircuitOpen,
    MissingRollbackData,
    MetricsUnavailable,
    AuditWriteFailure,
    Store,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            Self::ApprovalExpired => "APPROVAL_EXPIRED",
            Self::InvalidParams => "INVALID_PARAMS",
            Self::ExecutionFailure => "EXECUTION_FAILURE",
            Self::RestoreFailure => "RESTORE_FAILURE",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::MissingRollbackData => "MISSING_ROLLBACK_DATA",
            Self::MetricsUnavailable => "METRICS_UNAVAILABLE",
            Self::AuditWriteFailure => "AUDIT_WRITE_FAILURE",
            Self::Store => "STORE",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl InterventionError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            Self::ApprovalExpired(_) => ErrorKind::ApprovalExpired,
            Self::InvalidParams(_) => ErrorKind::InvalidParams,
            Self::ExecutionFailure { .. } => ErrorKind::ExecutionFailure,
            Self::RestoreFailure { .. } => ErrorKind::RestoreFailure,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::MissingRollbackData(_) => ErrorKind::MissingRollbackData,
            Self::MetricsUnavailable { .. } => ErrorKind::MetricsUnavailable,
            Self::AuditWriteFailure(_) => ErrorKind::AuditWriteFailure,
            Self::Store(_) => ErrorKind::Store,
        }
    }

    /// Whether the caller can fix the request and try again
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::InvalidStateTransition { .. }
                | Self::ApprovalExpired(_)
                | Self::InvalidParams(_)
        )
    }
}

impl From<AuditError> for InterventionError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::Query(e) => Self::Store(e),
            write @ AuditError::Write { .. } => Self::AuditWriteFailure(write.to_string()),
        }
    }
}
