//! Core orchestration logic.
//!
//! This module contains:
//! - Store: Durable intervention records with guarded status updates
//! - AuditLog: Append-only lifecycle ledger
//! - Rollback: Per-kind capture, execute and restore handlers
//! - Breaker: Per-service circuit breaker around external calls
//! - Monitor: Post-execution outcome assessment
//! - Orchestrator: Approval state machine and execution engine

pub mod audit_log;
pub mod breaker;
pub mod classifier;
pub mod db;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod rollback;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use audit_log::{AuditAlertSink, AuditError, AuditLog, AuditQuery, TracingAlertSink};
pub use breaker::{BreakerSettings, CallError, CircuitBreaker, CircuitState};
pub use classifier::classify;
pub use db::SharedConnection;
pub use error::{ErrorKind, InterventionError};
pub use monitor::{OutcomeMonitor, OutcomeThresholds};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use rollback::{ActionContext, HandlerRegistry, InterventionHandler, RollbackData};
pub use scheduler::{
    DeferredScheduler, RecordingScheduler, ScheduledTask, TaskScheduler, TokioScheduler,
};
pub use store::{InterventionStore, SqliteInterventionStore, StoreError, Transition};
