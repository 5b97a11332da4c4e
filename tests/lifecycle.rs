//! Lifecycle Integration Tests
//!
//! Propose, approve, execute and roll back interventions against the local
//! workspace, and check the audit trail each lifecycle leaves behind.

use std::sync::Arc;

use intervene::adapters::{CalendarService, GraphStore, LocalWorkspace};
use intervene::core::{db, AuditQuery, InterventionError, RecordingScheduler, ScheduledTask};
use intervene::domain::{AuditAction, InterventionKind, InterventionStatus};
use intervene::{Orchestrator, OrchestratorSettings};
use serde_json::json;

fn setup() -> (Orchestrator, Arc<LocalWorkspace>, Arc<RecordingScheduler>) {
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
async fn test_reassign_manager_end_to_end() {
    let (orch, ws, scheduler) = setup();
    ws.write_entity_field("emp_42", "manager_id", &json!("emp_old"))
        .await
        .unwrap();

    let id = orch
        .propose(
            InterventionKind::ReassignManager,
            "emp_42",
            json!({ "new_manager_id": "emp_7" }),
            "span of control too wide",
        )
        .await
        .unwrap();

    // HIGH impact: nothing happens until approval
    let record = orch.get_intervention(id).await.unwrap();
    assert_eq!(record.status, InterventionStatus::PendingApproval);
    assert_eq!(
        ws.read_entity_field("emp_42", "manager_id").await.unwrap(),
        Some(json!("emp_old"))
    );

    let record = orch.approve(id).await.unwrap();
    assert_eq!(record.status, InterventionStatus::Executed);
    assert!(record.approved_at.is_some());
    assert!(record.executed_at.is_some());
    assert!(record.result.is_some());
    assert!(record.rollback_data.is_some());
    assert_eq!(
        ws.read_entity_field("emp_42", "manager_id").await.unwrap(),
        Some(json!("emp_7"))
    );
    assert_eq!(scheduler.scheduled().len(), 1);
    assert_eq!(
        scheduler.scheduled()[0].0,
        ScheduledTask::OutcomeCheck { intervention_id: id }
    );

    let record = orch.rollback(id).await.unwrap();
    assert_eq!(record.status, InterventionStatus::RolledBack);
    assert!(record.rolled_back_at.is_some());
    assert_eq!(
        ws.read_entity_field("emp_42", "manager_id").await.unwrap(),
        Some(json!("emp_old"))
    );
}

#[tokio::test]
async fn test_audit_trail_is_complete_and_ordered() {
    let (orch, _ws, _) = setup();

    let id = orch
        .propose(
            InterventionKind::TransferTeam,
            "emp_1",
            json!({ "new_team_id": "team_b" }),
            "isolated",
        )
        .await
        .unwrap();
    orch.approve(id).await.unwrap();
    orch.rollback(id).await.unwrap();

    let mut entries = orch
        .query_audit_log(&AuditQuery::for_intervention(id))
        .await
        .unwrap();
    entries.reverse();

    let actions: Vec<AuditAction> = entries.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::InterventionProposed,
            AuditAction::InterventionApproved,
            AuditAction::InterventionExecuted,
            AuditAction::InterventionRolledBack,
        ]
    );
    assert!(entries
        .windows(2)
        .all(|pair| pair[0].timestamp < pair[1].timestamp));
    assert_eq!(entries[1].details["auto"], json!(false));
    assert_eq!(entries[3].details["trigger"], json!("manual"));
}

#[tokio::test]
async fn test_auto_approved_records_are_audited_as_auto() {
    let (orch, _ws, _) = setup();
    let id = orch
        .propose(
            InterventionKind::CapMeetingHours,
            "emp_1",
            json!({ "weekly_hours": 12.0 }),
            "meeting overload",
        )
        .await
        .unwrap();

    let approvals = orch
        .query_audit_log(
            &AuditQuery::for_intervention(id).action(AuditAction::InterventionApproved),
        )
        .await
        .unwrap();
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].details["auto"], json!(true));

    let record = orch.get_intervention(id).await.unwrap();
    assert_eq!(record.status, InterventionStatus::Executed);
}

#[tokio::test]
async fn test_focus_time_rollback_removes_calendar_blocks() {
    let (orch, ws, _) = setup();
    let id = orch
        .propose(
            InterventionKind::ScheduleFocusTime,
            "emp_3",
            json!({
                "start": "2026-03-02T09:00:00Z",
                "duration_minutes": 90,
                "occurrences": 5
            }),
            "fragmented calendar",
        )
        .await
        .unwrap();

    assert_eq!(ws.list_events("emp_3").await.unwrap().len(), 5);
    orch.rollback(id).await.unwrap();
    assert!(ws.list_events("emp_3").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_approve_outside_pending_leaves_record_unchanged() {
    let (orch, _ws, _) = setup();
    let id = orch
        .propose(
            InterventionKind::SendNudge,
            "emp_1",
            json!({ "message": "log off" }),
            "late hours",
        )
        .await
        .unwrap();
    let before = orch.get_intervention(id).await.unwrap();
    assert_eq!(before.status, InterventionStatus::Executed);

    let err = orch.approve(id).await.unwrap_err();
    assert!(matches!(
        err,
        InterventionError::InvalidStateTransition {
            status: InterventionStatus::Executed,
            ..
        }
    ));
    assert!(err.is_recoverable());

    let after = orch.get_intervention(id).await.unwrap();
    assert_eq!(after.status, before.status);
    assert_eq!(after.approved_at, before.approved_at);
    assert_eq!(after.executed_at, before.executed_at);
}

#[tokio::test]
async fn test_double_rollback_is_rejected() {
    let (orch, _ws, _) = setup();
    let id = orch
        .propose(
            InterventionKind::SendRecognition,
            "emp_1",
            json!({ "message": "thanks" }),
            "shipped",
        )
        .await
        .unwrap();

    orch.rollback(id).await.unwrap();
    let err = orch.rollback(id).await.unwrap_err();
    assert!(matches!(
        err,
        InterventionError::InvalidStateTransition {
            status: InterventionStatus::RolledBack,
            ..
        }
    ));
}

#[tokio::test]
async fn test_pending_approvals_oldest_first() {
    let (orch, _ws, _) = setup();
    let mut ids = Vec::new();
    for team in ["team_a", "team_b", "team_c"] {
        ids.push(
            orch.propose(
                InterventionKind::TransferTeam,
                "emp_1",
                json!({ "new_team_id": team }),
                "rebalance",
            )
            .await
            .unwrap(),
        );
    }

    let pending: Vec<_> = orch
        .get_pending_approvals()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(pending, ids);
}

#[tokio::test]
async fn test_concurrent_approvals_have_one_winner() {
    let (orch, ws, _) = setup();
    let id = orch
        .propose(
            InterventionKind::ChangeRole,
            "emp_9",
            json!({ "new_role": "staff_engineer" }),
            "promotion",
        )
        .await
        .unwrap();

    let (a, b, c) = tokio::join!(orch.approve(id), orch.approve(id), orch.approve(id));
    let results = [a, b, c];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(err, InterventionError::InvalidStateTransition { .. }));
    }

    let executed = orch
        .query_audit_log(
            &AuditQuery::for_intervention(id).action(AuditAction::InterventionExecuted),
        )
        .await
        .unwrap();
    assert_eq!(executed.len(), 1);
    assert_eq!(
        ws.read_entity_field("emp_9", "role").await.unwrap(),
        Some(json!("staff_engineer"))
    );
}
