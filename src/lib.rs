//! intervene - Approval-gated, reversible organizational interventions
//!
//! Automates interventions derived from organizational analytics (reassigning
//! managers, scheduling focus time, nudges) while guaranteeing that risky
//! actions never run without human sign-off, that every executed action can
//! be undone, and that every state change lands in an append-only audit log.
//!
//! # Architecture
//!
//! - Every proposal is classified by impact; HIGH impact waits for approval
//! - Execution captures a rollback snapshot before the side effect runs
//! - State transitions are compare-and-swap updates on the stored status
//! - A delayed outcome check rolls back interventions that made things worse
//!
//! # Modules
//!
//! - `adapters`: External collaborators (graph, metrics, calendar, notifier)
//! - `core`: Orchestration logic (Store, AuditLog, Rollback, Breaker, Monitor)
//! - `domain`: Data structures (InterventionRecord, AuditLogEntry, Outcome)
//! - `config`: Configuration discovery and resolution
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Propose a high impact change; it waits for approval
//! intervene propose reassign_manager emp_42 -p '{"new_manager_id":"emp_7"}' -r "span too wide"
//!
//! # Approve it (executes immediately)
//! intervene approve <intervention-id>
//!
//! # Undo it
//! intervene rollback <intervention-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{InterventionError, Orchestrator, OrchestratorSettings};
pub use domain::{
    AuditAction, AuditLogEntry, ImpactLevel, InterventionKind, InterventionRecord,
    InterventionStatus, OutcomeAssessment,
};
