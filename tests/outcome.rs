//! Outcome Check Integration Tests
//!
//! Tests for post-execution metric assessment, automatic rollback and
//! rescheduling of pending checks after a restart.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use intervene::adapters::{GraphStore, LocalWorkspace};
use intervene::core::{
    db, AuditQuery, DeferredScheduler, InterventionError, RecordingScheduler, ScheduledTask,
    SharedConnection, TokioScheduler,
};
use intervene::domain::{AuditAction, InterventionKind, InterventionStatus, MetricsSnapshot};
use intervene::{Orchestrator, OrchestratorSettings};
use serde_json::json;
use uuid::Uuid;

fn setup_on(
    conn: SharedConnection,
) -> (Orchestrator, Arc<LocalWorkspace>, Arc<RecordingScheduler>) {
    let scheduler = Arc::new(RecordingScheduler::new());
    let (orch, ws) =
        Orchestrator::local(conn, scheduler.clone(), OrchestratorSettings::default()).unwrap();
    (orch, ws, scheduler)
}

fn snapshot(centrality: f64, burnout_score: f64, offset: Duration) -> MetricsSnapshot {
    MetricsSnapshot {
        centrality,
        burnout_score,
        recorded_at: Utc::now() + offset,
    }
}

/// Execute a team transfer for `emp_1` whose prior team was `team_a`
async fn executed_transfer(orch: &Orchestrator, ws: &LocalWorkspace) -> Uuid {
    ws.write_entity_field("emp_1", "team_id", &json!("team_a"))
        .await
        .unwrap();
    ws.record_metrics("emp_1", snapshot(0.50, 0.40, -Duration::days(1)))
        .await
        .unwrap();

    let id = orch
        .propose(
            InterventionKind::TransferTeam,
            "emp_1",
            json!({ "new_team_id": "team_b" }),
            "bridge two teams",
        )
        .await
        .unwrap();
    orch.approve(id).await.unwrap();
    id
}

#[tokio::test]
async fn test_centrality_collapse_triggers_rollback() {
    let (orch, ws, _) = setup_on(db::open_in_memory().unwrap());
    let id = executed_transfer(&orch, &ws).await;

    ws.record_metrics("emp_1", snapshot(0.34, 0.40, Duration::hours(1)))
        .await
        .unwrap();

    let assessment = orch.check_intervention_outcome(id).await.unwrap();
    assert!(assessment.is_negative);
    assert!(assessment.auto_rollback_triggered);

    let record = orch.get_intervention(id).await.unwrap();
    assert_eq!(record.status, InterventionStatus::RolledBack);
    assert_eq!(
        ws.read_entity_field("emp_1", "team_id").await.unwrap(),
        Some(json!("team_a"))
    );

    let rolled_back = orch
        .query_audit_log(
            &AuditQuery::for_intervention(id).action(AuditAction::InterventionRolledBack),
        )
        .await
        .unwrap();
    assert_eq!(rolled_back[0].details["trigger"], json!("negative_outcome"));
}

#[tokio::test]
async fn test_small_centrality_drop_keeps_intervention() {
    let (orch, ws, _) = setup_on(db::open_in_memory().unwrap());
    let id = executed_transfer(&orch, &ws).await;

    ws.record_metrics("emp_1", snapshot(0.36, 0.40, Duration::hours(1)))
        .await
        .unwrap();

    let assessment = orch.check_intervention_outcome(id).await.unwrap();
    assert!(!assessment.is_negative);
    assert!(!assessment.auto_rollback_triggered);
    assert_eq!(
        orch.get_intervention(id).await.unwrap().status,
        InterventionStatus::Executed
    );
}

#[tokio::test]
async fn test_post_execution_samples_are_averaged() {
    let (orch, ws, _) = setup_on(db::open_in_memory().unwrap());
    let id = executed_transfer(&orch, &ws).await;

    // Burnout 0.40 -> avg(0.45, 0.55) = 0.50, a 25% increase
    ws.record_metrics("emp_1", snapshot(0.50, 0.45, Duration::hours(1)))
        .await
        .unwrap();
    ws.record_metrics("emp_1", snapshot(0.50, 0.55, Duration::hours(2)))
        .await
        .unwrap();

    let assessment = orch.check_intervention_outcome(id).await.unwrap();
    assert!(assessment.is_negative);
    let increase = assessment.metrics.burnout_increase.unwrap();
    assert!((increase - 0.25).abs() < 1e-9);
}

#[tokio::test]
async fn test_missing_post_execution_data_is_not_negative() {
    let (orch, ws, _) = setup_on(db::open_in_memory().unwrap());
    let id = executed_transfer(&orch, &ws).await;

    let assessment = orch.check_intervention_outcome(id).await.unwrap();
    assert!(!assessment.is_negative);
    assert!(assessment.reason.starts_with("Insufficient data"));

    let checked = orch
        .query_audit_log(&AuditQuery::for_intervention(id).action(AuditAction::OutcomeChecked))
        .await
        .unwrap();
    assert_eq!(checked.len(), 1);
    assert_eq!(checked[0].details["is_negative"], json!(false));
}

#[tokio::test]
async fn test_outcome_check_requires_executed() {
    let (orch, _ws, _) = setup_on(db::open_in_memory().unwrap());
    let id = orch
        .propose(
            InterventionKind::ChangeRole,
            "emp_1",
            json!({ "new_role": "lead" }),
            "r",
        )
        .await
        .unwrap();

    let err = orch.check_intervention_outcome(id).await.unwrap_err();
    assert!(matches!(
        err,
        InterventionError::InvalidStateTransition {
            status: InterventionStatus::PendingApproval,
            ..
        }
    ));
}

#[tokio::test]
async fn test_scheduled_task_runs_outcome_check() {
    let (orch, ws, scheduler) = setup_on(db::open_in_memory().unwrap());
    let id = executed_transfer(&orch, &ws).await;
    ws.record_metrics("emp_1", snapshot(0.10, 0.40, Duration::hours(1)))
        .await
        .unwrap();

    let (task, delay) = scheduler.scheduled()[0];
    assert_eq!(task, ScheduledTask::OutcomeCheck { intervention_id: id });
    assert_eq!(delay, StdDuration::from_secs(7 * 24 * 3600));

    orch.handle_task(task).await;
    assert_eq!(
        orch.get_intervention(id).await.unwrap().status,
        InterventionStatus::RolledBack
    );

    // Running the same task again is a quiet no-op
    orch.handle_task(task).await;
    let checked = orch
        .query_audit_log(&AuditQuery::for_intervention(id).action(AuditAction::OutcomeChecked))
        .await
        .unwrap();
    assert_eq!(checked.len(), 1);
}

#[tokio::test]
async fn test_restart_reschedules_unchecked_interventions() {
    let conn = db::open_in_memory().unwrap();
    let (orch, ws, _) = setup_on(conn.clone());
    let checked = executed_transfer(&orch, &ws).await;
    let unchecked = orch
        .propose(
            InterventionKind::SendRecognition,
            "emp_2",
            json!({ "message": "thank you" }),
            "helped onboarding",
        )
        .await
        .unwrap();
    orch.check_intervention_outcome(checked).await.unwrap();

    // A new process over the same database
    let (restarted, _, scheduler) = setup_on(conn);
    assert_eq!(restarted.reschedule_outcome_checks().await.unwrap(), 1);

    let scheduled = scheduler.scheduled();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(
        scheduled[0].0,
        ScheduledTask::OutcomeCheck {
            intervention_id: unchecked
        }
    );
    assert!(scheduled[0].1 <= StdDuration::from_secs(7 * 24 * 3600));
}

#[tokio::test]
async fn test_daemon_picks_up_interventions_executed_elsewhere() {
    let conn = db::open_in_memory().unwrap();
    let settings = OrchestratorSettings {
        outcome_check_delay: Duration::zero(),
        ..Default::default()
    };

    let (scheduler, mut due) = TokioScheduler::channel();
    let (daemon, _) = Orchestrator::local(conn.clone(), Arc::new(scheduler.clone()), settings).unwrap();
    assert_eq!(daemon.reschedule_outcome_checks().await.unwrap(), 0);

    // A one-shot command executes while the daemon is running
    let (oneshot, _) = Orchestrator::local(conn, Arc::new(DeferredScheduler), settings).unwrap();
    let id = oneshot
        .propose(
            InterventionKind::SendNudge,
            "emp_1",
            json!({ "message": "log off" }),
            "late hours",
        )
        .await
        .unwrap();

    // The next sweep tick schedules it exactly once
    assert_eq!(daemon.reschedule_outcome_checks().await.unwrap(), 1);
    assert_eq!(daemon.reschedule_outcome_checks().await.unwrap(), 0);

    let task = tokio::time::timeout(StdDuration::from_secs(5), due.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task, ScheduledTask::OutcomeCheck { intervention_id: id });

    daemon.handle_task(task).await;
    assert_eq!(scheduler.waiting(), 0);

    let checked = daemon
        .query_audit_log(&AuditQuery::for_intervention(id).action(AuditAction::OutcomeChecked))
        .await
        .unwrap();
    assert_eq!(checked.len(), 1);
    assert_eq!(daemon.reschedule_outcome_checks().await.unwrap(), 0);
}
