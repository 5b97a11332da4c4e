//! Domain types for the intervention orchestrator.
//!
//! This module contains the core data structures:
//! - Intervention: the persisted record, its kind and typed parameters
//! - Audit: immutable audit log entries
//! - Outcome: post-execution metrics and assessments

pub mod audit;
pub mod intervention;
pub mod outcome;

// Re-export commonly used types
pub use audit::{AuditAction, AuditLogEntry};
pub use intervention::{
    ImpactLevel, InterventionAction, InterventionKind, InterventionRecord, InterventionStatus,
    ParamsError, UnknownVariant,
};
pub use outcome::{MetricsSnapshot, OutcomeAssessment, OutcomeMetrics};
