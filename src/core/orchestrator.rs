//! Intervention orchestrator.
//!
//! Drives every intervention through its lifecycle: classification, approval,
//! execution with rollback capture, rollback, timeout, and the delayed
//! outcome check. The orchestrator keeps no mutable state of its own; every
//! transition reads the record and then writes through a conditional update
//! guarded by the expected prior status.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{LocalWorkspace, MetricsHistory, SERVICE_METRICS};
use crate::domain::{
    AuditAction, AuditLogEntry, InterventionAction, InterventionKind, InterventionRecord,
    InterventionStatus, OutcomeAssessment, ParamsError,
};

use super::audit_log::{AuditLog, AuditQuery};
use super::breaker::{BreakerSettings, CallError, CircuitBreaker};
use super::classifier::classify;
use super::db::SharedConnection;
use super::error::{ErrorKind, InterventionError};
use super::monitor::{OutcomeMonitor, OutcomeThresholds};
use super::rollback::{ActionContext, HandlerRegistry, InterventionHandler, RollbackData};
use super::scheduler::{ScheduledTask, TaskScheduler};
use super::store::{InterventionStore, SqliteInterventionStore, StoreError, Transition};

pub type Result<T> = std::result::Result<T, InterventionError>;

/// Timing and threshold knobs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrchestratorSettings {
    /// How long a HIGH impact proposal waits for approval
    pub approval_timeout: Duration,

    /// Delay between execution and the outcome check
    pub outcome_check_delay: Duration,

    pub thresholds: OutcomeThresholds,

    pub breaker: BreakerSettings,

    pub audit_page_size: usize,

    /// How long an APPROVED record may hold a rollback snapshot before its
    /// execution is treated as interrupted
    pub interrupted_execution_after: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            approval_timeout: Duration::hours(24),
            outcome_check_delay: Duration::days(7),
            thresholds: OutcomeThresholds::default(),
            breaker: BreakerSettings::default(),
            audit_page_size: super::audit_log::MAX_PAGE_SIZE,
            interrupted_execution_after: Duration::minutes(15),
        }
    }
}

/// Why a rollback was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RollbackTrigger {
    Manual,
    NegativeOutcome,
}

impl RollbackTrigger {
    fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::NegativeOutcome => "negative_outcome",
        }
    }
}

/// Main intervention orchestrator
pub struct Orchestrator {
    store: Arc<dyn InterventionStore>,
    audit: Arc<AuditLog>,
    handlers: HandlerRegistry,
    breaker: CircuitBreaker,
    history: Arc<dyn MetricsHistory>,
    scheduler: Arc<dyn TaskScheduler>,
    monitor: OutcomeMonitor,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn InterventionStore>,
        audit: Arc<AuditLog>,
        handlers: HandlerRegistry,
        history: Arc<dyn MetricsHistory>,
        scheduler: Arc<dyn TaskScheduler>,
        settings: OrchestratorSettings,
    ) -> Self {
        let missing = handlers.missing_known_kinds();
        if !missing.is_empty() {
            warn!(?missing, "Known intervention kinds without a handler");
        }

        Self {
            store,
            audit,
            handlers,
            breaker: CircuitBreaker::new(settings.breaker),
            history,
            scheduler,
            monitor: OutcomeMonitor::new(settings.thresholds),
            settings,
        }
    }

    /// Orchestrator backed entirely by one SQLite database, with the local
    /// workspace acting as graph, metrics history, calendar and notifier
    pub fn local(
        conn: SharedConnection,
        scheduler: Arc<dyn TaskScheduler>,
        settings: OrchestratorSettings,
    ) -> anyhow::Result<(Self, Arc<LocalWorkspace>)> {
        let store = Arc::new(SqliteInterventionStore::new(conn.clone())?);
        let audit = Arc::new(AuditLog::new(conn.clone(), settings.audit_page_size)?);
        let workspace = Arc::new(LocalWorkspace::new(conn)?);
        let handlers =
            HandlerRegistry::standard(workspace.clone(), workspace.clone(), workspace.clone());

        let orchestrator = Self::new(
            store,
            audit,
            handlers,
            workspace.clone(),
            scheduler,
            settings,
        );
        Ok((orchestrator, workspace))
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Propose an intervention.
    ///
    /// HIGH impact proposals wait for approval; everything else is approved
    /// and executed immediately. The ID is returned even when that execution
    /// fails; the failure is visible on the record.
    #[instrument(
        skip(self, kind, target_entity_id, params, reason),
        fields(kind = %kind, target = %target_entity_id)
    )]
    pub async fn propose(
        &self,
        kind: InterventionKind,
        target_entity_id: &str,
        params: Value,
        reason: &str,
    ) -> Result<Uuid> {
        if target_entity_id.trim().is_empty() {
            return Err(ParamsError::EmptyTarget.into());
        }
        InterventionAction::parse(&kind, &params)?;
        if !kind.is_known() {
            warn!("Unknown intervention kind, classified as low impact");
        }

        let impact_level = classify(&kind, &params);
        let record = InterventionRecord::propose(
            kind,
            target_entity_id.to_string(),
            params,
            reason.to_string(),
            impact_level,
        );
        let id = record.id;

        self.store.insert(&record).await?;
        info!(%id, %impact_level, status = %record.status, "Intervention proposed");

        self.audit
            .log(
                AuditAction::InterventionProposed,
                id,
                json!({
                    "type": record.kind,
                    "target_entity_id": record.target_entity_id,
                    "impact_level": impact_level,
                    "params": record.params,
                    "reason": record.reason,
                }),
            )
            .await;

        if record.status == InterventionStatus::Approved {
            self.audit
                .log(
                    AuditAction::InterventionApproved,
                    id,
                    json!({ "auto": true, "impact_level": impact_level }),
                )
                .await;

            if let Err(e) = self.execute(id).await {
                warn!(%id, error = %e, "Auto-approved intervention failed to execute");
            }
        }

        Ok(id)
    }

    /// Approve a pending intervention and execute it
    #[instrument(skip(self), fields(intervention_id = %id))]
    pub async fn approve(&self, id: Uuid) -> Result<InterventionRecord> {
        let record = self.load(id).await?;
        require_status(&record, InterventionStatus::PendingApproval, "approve")?;

        let cutoff = Utc::now() - self.settings.approval_timeout;
        if record.proposed_at < cutoff {
            if self
                .transition(&record, Transition::to(InterventionStatus::Timeout))
                .await?
            {
                warn!("Approval arrived after the approval window");
                self.audit
                    .log(
                        AuditAction::InterventionTimeout,
                        id,
                        json!({
                            "timeout_hours": self.settings.approval_timeout.num_hours(),
                            "detected_by": "approve",
                        }),
                    )
                    .await;
                return Err(InterventionError::ApprovalExpired(id));
            }
            return Err(self.lost_race(id, "approve").await);
        }

        let approved = Transition::to(InterventionStatus::Approved).approved_at(Utc::now());
        if !self.transition(&record, approved).await? {
            return Err(self.lost_race(id, "approve").await);
        }

        info!("Intervention approved");
        self.audit
            .log(AuditAction::InterventionApproved, id, json!({ "auto": false }))
            .await;

        self.execute(id).await
    }

    /// Reject a pending intervention
    #[instrument(skip(self, reason), fields(intervention_id = %id))]
    pub async fn reject(&self, id: Uuid, reason: &str) -> Result<InterventionRecord> {
        let record = self.load(id).await?;
        require_status(&record, InterventionStatus::PendingApproval, "reject")?;

        let rejected = Transition::to(InterventionStatus::Failed).error(reason);
        if !self.transition(&record, rejected).await? {
            return Err(self.lost_race(id, "reject").await);
        }

        info!(%reason, "Intervention rejected");
        self.audit
            .log(
                AuditAction::InterventionRejected,
                id,
                json!({ "reason": reason }),
            )
            .await;

        self.load(id).await
    }

    /// Move every expired pending proposal to TIMEOUT.
    ///
    /// Safe to run repeatedly and concurrently with approve/reject: records
    /// already moved by someone else are not touched.
    #[instrument(skip(self))]
    pub async fn timeout_expired_approvals(&self) -> Result<usize> {
        let cutoff = Utc::now() - self.settings.approval_timeout;
        let expired = self.store.expire_pending(cutoff).await?;

        for id in &expired {
            self.audit
                .log(
                    AuditAction::InterventionTimeout,
                    *id,
                    json!({
                        "timeout_hours": self.settings.approval_timeout.num_hours(),
                        "detected_by": "sweep",
                    }),
                )
                .await;
        }

        if expired.is_empty() {
            debug!("No expired approvals");
        } else {
            info!(count = expired.len(), "Expired pending approvals");
        }
        Ok(expired.len())
    }

    /// Execute an approved intervention.
    ///
    /// The rollback snapshot is captured and stored before the side effect
    /// runs. Storing it is also the execution claim: a second caller finds
    /// a snapshot already attached and backs off.
    #[instrument(skip(self), fields(intervention_id = %id))]
    pub async fn execute(&self, id: Uuid) -> Result<InterventionRecord> {
        let record = self.load(id).await?;
        require_status(&record, InterventionStatus::Approved, "execute")?;

        let action = match record.action() {
            Ok(Some(action)) => action,
            Ok(None) => {
                let reason = format!("no handler registered for kind '{}'", record.kind);
                return Err(self.fail_execution(&record, ExecutionFailure::Failed(reason)).await);
            }
            Err(e) => {
                return Err(self
                    .fail_execution(&record, ExecutionFailure::Failed(e.to_string()))
                    .await)
            }
        };
        let Some(handler) = self.handlers.get(&record.kind) else {
            let reason = format!("no handler registered for kind '{}'", record.kind);
            return Err(self.fail_execution(&record, ExecutionFailure::Failed(reason)).await);
        };

        let ctx = ActionContext {
            intervention_id: id,
            target_entity_id: &record.target_entity_id,
            action: &action,
        };
        let service = handler.service();

        let captured = match self.breaker.call(service, handler.capture(&ctx)).await {
            Ok(captured) => captured,
            Err(e) => return Err(self.fail_execution(&record, e.into()).await),
        };
        let snapshot = match captured.to_value() {
            Ok(value) => value,
            Err(e) => {
                return Err(self
                    .fail_execution(&record, ExecutionFailure::Failed(format!("{:#}", e)))
                    .await)
            }
        };

        if !self.store.attach_rollback_data(id, &snapshot).await? {
            return Err(self.lost_race(id, "execute").await);
        }
        debug!(service, "Rollback data captured");

        let result = match self.breaker.call(service, handler.execute(&ctx)).await {
            Ok(result) => result,
            Err(CallError::CircuitOpen { service }) => {
                return Err(self
                    .fail_execution(&record, ExecutionFailure::CircuitOpen(service))
                    .await)
            }
            Err(CallError::Inner(e)) => {
                // The side effect may have been applied in part
                let compensation = self.compensate(handler.as_ref(), &captured).await;
                let failure = ExecutionFailure::Failed(format!("{:#}", e));
                return Err(self
                    .fail_execution_with(&record, failure, Some(compensation))
                    .await);
            }
        };

        let executed = Transition::to(InterventionStatus::Executed)
            .executed_at(Utc::now())
            .result(result.clone());
        if !self.transition(&record, executed).await? {
            error!("Side effect applied but record left APPROVED by a concurrent writer");
            return Err(self.lost_race(id, "execute").await);
        }

        info!(service, "Intervention executed");
        self.audit
            .log(
                AuditAction::InterventionExecuted,
                id,
                json!({ "result": result }),
            )
            .await;

        self.scheduler.schedule(
            ScheduledTask::OutcomeCheck { intervention_id: id },
            self.outcome_delay(),
        );

        self.load(id).await
    }

    /// Undo an executed intervention from its stored snapshot
    #[instrument(skip(self), fields(intervention_id = %id))]
    pub async fn rollback(&self, id: Uuid) -> Result<InterventionRecord> {
        self.rollback_with(id, RollbackTrigger::Manual).await
    }

    async fn rollback_with(&self, id: Uuid, trigger: RollbackTrigger) -> Result<InterventionRecord> {
        let record = self.load(id).await?;
        require_status(&record, InterventionStatus::Executed, "roll back")?;

        let data = record
            .rollback_data
            .as_ref()
            .ok_or(InterventionError::MissingRollbackData(id))?;

        let restored = match RollbackData::from_value(data) {
            Ok(snapshot) => match self.handlers.get(&record.kind) {
                Some(handler) => self
                    .breaker
                    .call(handler.service(), handler.restore(&snapshot))
                    .await
                    .map_err(|e| match e {
                        CallError::CircuitOpen { service } => {
                            format!("circuit open for service '{}'", service)
                        }
                        CallError::Inner(e) => format!("{:#}", e),
                    }),
                None => Err(format!("no handler registered for kind '{}'", record.kind)),
            },
            Err(e) => Err(format!("{:#}", e)),
        };

        let details = match restored {
            Ok(details) => details,
            Err(reason) => {
                error!(
                    %reason,
                    trigger = trigger.as_str(),
                    "ROLLBACK FAILED: intervention remains executed"
                );
                self.audit
                    .log(
                        AuditAction::RollbackFailed,
                        id,
                        json!({ "error": reason, "trigger": trigger.as_str() }),
                    )
                    .await;
                return Err(InterventionError::RestoreFailure { id, reason });
            }
        };

        let rolled_back = Transition::to(InterventionStatus::RolledBack).rolled_back_at(Utc::now());
        if !self.transition(&record, rolled_back).await? {
            return Err(self.lost_race(id, "roll back").await);
        }

        info!(trigger = trigger.as_str(), "Intervention rolled back");
        self.audit
            .log(
                AuditAction::InterventionRolledBack,
                id,
                json!({ "trigger": trigger.as_str(), "restore": details }),
            )
            .await;

        self.load(id).await
    }

    /// Compare post-execution metrics with the baseline and roll back on a
    /// negative outcome
    #[instrument(skip(self), fields(intervention_id = %id))]
    pub async fn check_intervention_outcome(&self, id: Uuid) -> Result<OutcomeAssessment> {
        let record = self.load(id).await?;
        require_status(&record, InterventionStatus::Executed, "check outcome of")?;

        let executed_at = record.executed_at.ok_or_else(|| {
            StoreError::Corrupt(format!("executed intervention {} has no executed_at", id))
        })?;
        let target = record.target_entity_id.as_str();

        let metrics = self
            .breaker
            .call(SERVICE_METRICS, async {
                let before = self.history.read_metrics_before(target, executed_at).await?;
                let after = self.history.read_metrics_after(target, executed_at).await?;
                anyhow::Ok((before, after))
            })
            .await;
        let (baseline, current) = metrics.map_err(|e| InterventionError::MetricsUnavailable {
            id,
            reason: match e {
                CallError::CircuitOpen { service } => format!("circuit open for service '{}'", service),
                CallError::Inner(e) => format!("{:#}", e),
            },
        })?;

        let mut assessment = self.monitor.assess(id, baseline, current);
        if assessment.is_negative {
            warn!(reason = %assessment.reason, "Negative outcome, rolling back");
            match self.rollback_with(id, RollbackTrigger::NegativeOutcome).await {
                Ok(_) => assessment.auto_rollback_triggered = true,
                Err(e) => {
                    error!(error = %e, "Automatic rollback failed");
                    assessment.reason = format!("{}; automatic rollback failed: {}", assessment.reason, e);
                }
            }
        } else {
            info!(reason = %assessment.reason, "Outcome checked");
        }

        self.audit
            .log(
                AuditAction::OutcomeChecked,
                id,
                json!({
                    "is_negative": assessment.is_negative,
                    "reason": assessment.reason,
                    "metrics": assessment.metrics,
                    "auto_rollback_triggered": assessment.auto_rollback_triggered,
                }),
            )
            .await;

        Ok(assessment)
    }

    /// Pending approvals, oldest proposal first
    pub async fn get_pending_approvals(&self) -> Result<Vec<InterventionRecord>> {
        Ok(self
            .store
            .list_by_status(InterventionStatus::PendingApproval)
            .await?)
    }

    pub async fn get_intervention(&self, id: Uuid) -> Result<InterventionRecord> {
        self.load(id).await
    }

    pub async fn list_interventions(
        &self,
        status: InterventionStatus,
    ) -> Result<Vec<InterventionRecord>> {
        Ok(self.store.list_by_status(status).await?)
    }

    pub async fn query_audit_log(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>> {
        Ok(self.audit.query(query).await?)
    }

    /// Schedule outcome checks for executed records that have not been
    /// assessed yet, returning the number newly scheduled.
    ///
    /// `serve` runs this at startup and on every sweep tick, which is how
    /// records executed by one-shot CLI commands get their check.
    #[instrument(skip(self))]
    pub async fn reschedule_outcome_checks(&self) -> Result<usize> {
        let executed = self.store.list_by_status(InterventionStatus::Executed).await?;
        let now = Utc::now();
        let mut scheduled = 0;

        for record in executed {
            if self
                .audit
                .has_entry(record.id, AuditAction::OutcomeChecked)
                .await?
            {
                continue;
            }

            let due = record.executed_at.unwrap_or(now) + self.settings.outcome_check_delay;
            let delay = (due - now).to_std().unwrap_or(StdDuration::ZERO);
            let task = ScheduledTask::OutcomeCheck {
                intervention_id: record.id,
            };
            if self.scheduler.schedule(task, delay) {
                scheduled += 1;
            }
        }

        if scheduled > 0 {
            info!(scheduled, "Outcome checks scheduled");
        }
        Ok(scheduled)
    }

    /// Fail APPROVED records whose execution claimed a snapshot but never
    /// finished (the executing process died), restoring from the snapshot.
    ///
    /// Only records approved longer than `interrupted_execution_after` ago
    /// are touched, so executions still in flight elsewhere are left alone.
    #[instrument(skip(self))]
    pub async fn fail_interrupted_executions(&self) -> Result<usize> {
        let cutoff = Utc::now() - self.settings.interrupted_execution_after;
        let approved = self.store.list_by_status(InterventionStatus::Approved).await?;
        let mut recovered = 0;

        for record in approved {
            let Some(data) = record.rollback_data.as_ref() else {
                continue;
            };
            if record.approved_at.map_or(true, |at| at > cutoff) {
                continue;
            }

            let reason = "execution interrupted before completion";
            let failed = Transition::to(InterventionStatus::Failed).error(reason);
            if !self.transition(&record, failed).await? {
                continue;
            }

            let compensation = match (
                RollbackData::from_value(data),
                self.handlers.get(&record.kind),
            ) {
                (Ok(snapshot), Some(handler)) => self.compensate(handler.as_ref(), &snapshot).await,
                (Err(e), _) => json!({ "restored": false, "error": format!("{:#}", e) }),
                (_, None) => json!({
                    "restored": false,
                    "error": format!("no handler registered for kind '{}'", record.kind),
                }),
            };

            warn!(id = %record.id, "Interrupted execution marked failed");
            self.audit
                .log(
                    AuditAction::InterventionFailed,
                    record.id,
                    json!({
                        "error": reason,
                        "code": ErrorKind::ExecutionFailure,
                        "compensation": compensation,
                    }),
                )
                .await;
            recovered += 1;
        }

        if recovered > 0 {
            info!(recovered, "Interrupted executions recovered");
        }
        Ok(recovered)
    }

    /// Run a task delivered by the scheduler
    pub async fn handle_task(&self, task: ScheduledTask) {
        match task {
            ScheduledTask::OutcomeCheck { intervention_id } => {
                match self.check_intervention_outcome(intervention_id).await {
                    Ok(assessment) => debug!(
                        %intervention_id,
                        is_negative = assessment.is_negative,
                        "Scheduled outcome check done"
                    ),
                    Err(e) if e.is_recoverable() => {
                        debug!(%intervention_id, error = %e, "Scheduled outcome check skipped")
                    }
                    Err(e) => {
                        warn!(%intervention_id, error = %e, "Scheduled outcome check failed")
                    }
                }
            }
        }
        self.scheduler.finished(task);
    }

    fn outcome_delay(&self) -> StdDuration {
        self.settings
            .outcome_check_delay
            .to_std()
            .unwrap_or(StdDuration::ZERO)
    }

    async fn load(&self, id: Uuid) -> Result<InterventionRecord> {
        self.store
            .get(id)
            .await?
            .ok_or(InterventionError::NotFound(id))
    }

    /// Conditional update from the record's current status
    async fn transition(&self, record: &InterventionRecord, transition: Transition) -> Result<bool> {
        debug_assert!(record.status.can_transition_to(transition.to));
        Ok(self
            .store
            .transition(record.id, record.status, transition)
            .await?)
    }

    /// Error for a guarded write that matched no row
    async fn lost_race(&self, id: Uuid, operation: &'static str) -> InterventionError {
        match self.store.get(id).await {
            Ok(Some(current)) => {
                debug!(%id, status = %current.status, operation, "Lost race on status update");
                InterventionError::InvalidStateTransition {
                    id,
                    status: current.status,
                    operation,
                }
            }
            Ok(None) => InterventionError::NotFound(id),
            Err(e) => e.into(),
        }
    }

    /// Best-effort restore after a side effect failed part way, reported in
    /// the failure's audit details
    async fn compensate(
        &self,
        handler: &dyn InterventionHandler,
        snapshot: &RollbackData,
    ) -> Value {
        // Straight to the handler: the breaker may have just opened on the
        // failure being compensated
        match handler.restore(snapshot).await {
            Ok(details) => {
                info!("Partial side effect restored from snapshot");
                json!({ "restored": true, "details": details })
            }
            Err(e) => {
                error!(error = %format!("{:#}", e), "COMPENSATION FAILED: partial side effect remains");
                json!({ "restored": false, "error": format!("{:#}", e) })
            }
        }
    }

    /// Mark an approved record FAILED and return the error to surface
    async fn fail_execution(
        &self,
        record: &InterventionRecord,
        failure: ExecutionFailure,
    ) -> InterventionError {
        self.fail_execution_with(record, failure, None).await
    }

    async fn fail_execution_with(
        &self,
        record: &InterventionRecord,
        failure: ExecutionFailure,
        compensation: Option<Value>,
    ) -> InterventionError {
        let id = record.id;
        let err = match failure {
            ExecutionFailure::CircuitOpen(service) => InterventionError::CircuitOpen { service },
            ExecutionFailure::Failed(reason) => InterventionError::ExecutionFailure { id, reason },
        };

        let failed = Transition::to(InterventionStatus::Failed).error(err.to_string());
        match self.transition(record, failed).await {
            Ok(true) => {
                warn!(%id, error = %err, "Intervention failed");
                let mut details = json!({ "error": err.to_string(), "code": err.kind() });
                if let Some(compensation) = compensation {
                    details["compensation"] = compensation;
                }
                self.audit
                    .log(AuditAction::InterventionFailed, id, details)
                    .await;
            }
            Ok(false) => return self.lost_race(id, "execute").await,
            Err(store_err) => {
                error!(%id, error = %store_err, "Failed to record execution failure");
                return store_err;
            }
        }
        err
    }
}

/// Why execution did not complete
enum ExecutionFailure {
    CircuitOpen(String),
    Failed(String),
}

impl From<CallError<anyhow::Error>> for ExecutionFailure {
    fn from(err: CallError<anyhow::Error>) -> Self {
        match err {
            CallError::CircuitOpen { service } => Self::CircuitOpen(service),
            CallError::Inner(e) => Self::Failed(format!("{:#}", e)),
        }
    }
}

fn require_status(
    record: &InterventionRecord,
    expected: InterventionStatus,
    operation: &'static str,
) -> Result<()> {
    if record.status == expected {
        Ok(())
    } else {
        Err(InterventionError::InvalidStateTransition {
            id: record.id,
            status: record.status,
            operation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db;
    use crate::core::scheduler::RecordingScheduler;

    async fn setup() -> (Orchestrator, Arc<LocalWorkspace>, Arc<RecordingScheduler>) {
        let scheduler = Arc::new(RecordingScheduler::new());
        let (orchestrator, workspace) = Orchestrator::local(
            db::open_in_memory().unwrap(),
            scheduler.clone(),
            OrchestratorSettings::default(),
        )
        .unwrap();
        (orchestrator, workspace, scheduler)
    }

    #[tokio::test]
    async fn test_high_impact_waits_for_approval() {
        let (orch, _, scheduler) = setup().await;
        let id = orch
            .propose(
                InterventionKind::TransferTeam,
                "emp_1",
                json!({ "new_team_id": "team_b" }),
                "isolation",
            )
            .await
            .unwrap();

        let record = orch.get_intervention(id).await.unwrap();
        assert_eq!(record.status, InterventionStatus::PendingApproval);
        assert!(record.approved_at.is_none());
        assert!(scheduler.scheduled().is_empty());
        assert_eq!(orch.get_pending_approvals().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_low_impact_executes_and_schedules_check() {
        let (orch, _, scheduler) = setup().await;
        let id = orch
            .propose(
                InterventionKind::SendRecognition,
                "emp_1",
                json!({ "message": "great work" }),
                "shipped",
            )
            .await
            .unwrap();

        let record = orch.get_intervention(id).await.unwrap();
        assert_eq!(record.status, InterventionStatus::Executed);
        assert!(record.result.is_some());
        assert!(record.rollback_data.is_some());
        assert_eq!(
            scheduler.scheduled(),
            vec![(
                ScheduledTask::OutcomeCheck { intervention_id: id },
                StdDuration::from_secs(7 * 24 * 3600)
            )]
        );
    }

    #[tokio::test]
    async fn test_unknown_kind_fails_without_rollback_data() {
        let (orch, _, _) = setup().await;
        let id = orch
            .propose(InterventionKind::from("launch_rocket"), "emp_1", json!({}), "?")
            .await
            .unwrap();

        let record = orch.get_intervention(id).await.unwrap();
        assert_eq!(record.status, InterventionStatus::Failed);
        assert!(record.rollback_data.is_none());
        assert!(record.error.unwrap().contains("no handler"));
    }

    #[tokio::test]
    async fn test_invalid_params_rejected_at_propose() {
        let (orch, _, _) = setup().await;
        let err = orch
            .propose(InterventionKind::ReassignManager, "emp_1", json!({}), "r")
            .await
            .unwrap_err();
        assert!(matches!(err, InterventionError::InvalidParams(_)));

        let err = orch
            .propose(InterventionKind::SendNudge, " ", json!({ "message": "hi" }), "r")
            .await
            .unwrap_err();
        assert!(matches!(err, InterventionError::InvalidParams(ParamsError::EmptyTarget)));
    }

    #[tokio::test]
    async fn test_reject_and_reapprove() {
        let (orch, _, _) = setup().await;
        let id = orch
            .propose(
                InterventionKind::ChangeRole,
                "emp_1",
                json!({ "new_role": "lead" }),
                "r",
            )
            .await
            .unwrap();

        let record = orch.reject(id, "not now").await.unwrap();
        assert_eq!(record.status, InterventionStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("not now"));

        let err = orch.approve(id).await.unwrap_err();
        assert!(matches!(
            err,
            InterventionError::InvalidStateTransition {
                status: InterventionStatus::Failed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_rollback_requires_executed() {
        let (orch, _, _) = setup().await;
        let id = orch
            .propose(
                InterventionKind::AdjustCompensation,
                "emp_1",
                json!({ "new_band": "L5" }),
                "r",
            )
            .await
            .unwrap();
        assert!(matches!(
            orch.rollback(id).await.unwrap_err(),
            InterventionError::InvalidStateTransition { .. }
        ));
        assert!(matches!(
            orch.rollback(Uuid::new_v4()).await.unwrap_err(),
            InterventionError::NotFound(_)
        ));
    }
}
