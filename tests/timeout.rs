//! Approval Timeout Integration Tests
//!
//! Tests for the expiry sweep, late approvals and races between approvers
//! and the sweep.

use std::sync::Arc;

use chrono::{Duration, Utc};
use intervene::core::{
    classify, db, AuditQuery, InterventionError, InterventionStore, RecordingScheduler,
    SharedConnection, SqliteInterventionStore,
};
use intervene::domain::{AuditAction, InterventionKind, InterventionRecord, InterventionStatus};
use intervene::{Orchestrator, OrchestratorSettings};
use serde_json::{json, Value};
use uuid::Uuid;

struct Harness {
    orch: Orchestrator,
    store: SqliteInterventionStore,
}

fn setup() -> Harness {
    let conn: SharedConnection = db::open_in_memory().unwrap();
    let (orch, _) = Orchestrator::local(
        conn.clone(),
        Arc::new(RecordingScheduler::new()),
        OrchestratorSettings::default(),
    )
    .unwrap();
    let store = SqliteInterventionStore::new(conn).unwrap();
    Harness { orch, store }
}

/// Insert a HIGH impact proposal made `age` ago
async fn insert_pending(store: &SqliteInterventionStore, age: Duration) -> Uuid {
    let kind = InterventionKind::ReassignManager;
    let params: Value = json!({ "new_manager_id": "emp_2" });
    let impact = classify(&kind, &params);
    let mut record = InterventionRecord::propose(
        kind,
        "emp_1".to_string(),
        params,
        "restructure".to_string(),
        impact,
    );
    record.proposed_at = Utc::now() - age;
    store.insert(&record).await.unwrap();
    record.id
}

async fn timeout_entries(orch: &Orchestrator, id: Uuid) -> usize {
    orch.query_audit_log(&AuditQuery::for_intervention(id).action(AuditAction::InterventionTimeout))
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn test_sweep_expires_only_old_proposals() {
    let h = setup();
    let old = insert_pending(&h.store, Duration::hours(25)).await;
    let fresh = insert_pending(&h.store, Duration::hours(1)).await;

    assert_eq!(h.orch.timeout_expired_approvals().await.unwrap(), 1);

    let old = h.orch.get_intervention(old).await.unwrap();
    assert_eq!(old.status, InterventionStatus::Timeout);
    assert!(old.approved_at.is_none());
    assert_eq!(timeout_entries(&h.orch, old.id).await, 1);

    let fresh = h.orch.get_intervention(fresh).await.unwrap();
    assert_eq!(fresh.status, InterventionStatus::PendingApproval);
}

#[tokio::test]
async fn test_sweep_is_idempotent() {
    let h = setup();
    let id = insert_pending(&h.store, Duration::hours(48)).await;
    insert_pending(&h.store, Duration::hours(30)).await;

    assert_eq!(h.orch.timeout_expired_approvals().await.unwrap(), 2);
    assert_eq!(h.orch.timeout_expired_approvals().await.unwrap(), 0);
    assert_eq!(timeout_entries(&h.orch, id).await, 1);
}

#[tokio::test]
async fn test_late_approval_times_out() {
    let h = setup();
    let id = insert_pending(&h.store, Duration::hours(25)).await;

    let err = h.orch.approve(id).await.unwrap_err();
    assert!(matches!(err, InterventionError::ApprovalExpired(e) if e == id));

    let record = h.orch.get_intervention(id).await.unwrap();
    assert_eq!(record.status, InterventionStatus::Timeout);
    assert!(record.executed_at.is_none());

    // The sweep finds nothing left to do
    assert_eq!(h.orch.timeout_expired_approvals().await.unwrap(), 0);
    assert_eq!(timeout_entries(&h.orch, id).await, 1);
}

#[tokio::test]
async fn test_reject_after_timeout_is_invalid() {
    let h = setup();
    let id = insert_pending(&h.store, Duration::hours(25)).await;
    h.orch.timeout_expired_approvals().await.unwrap();

    let err = h.orch.reject(id, "too late").await.unwrap_err();
    assert!(matches!(
        err,
        InterventionError::InvalidStateTransition {
            status: InterventionStatus::Timeout,
            ..
        }
    ));
}

#[tokio::test]
async fn test_approve_and_sweep_race_has_one_winner() {
    let h = setup();
    let id = insert_pending(&h.store, Duration::hours(25)).await;

    let (approved, swept) = tokio::join!(h.orch.approve(id), h.orch.timeout_expired_approvals());

    assert!(approved.is_err());
    let swept = swept.unwrap();
    assert!(swept <= 1);

    let record = h.orch.get_intervention(id).await.unwrap();
    assert_eq!(record.status, InterventionStatus::Timeout);
    assert_eq!(timeout_entries(&h.orch, id).await, 1);
}

#[tokio::test]
async fn test_approved_record_is_not_swept() {
    let h = setup();
    let id = insert_pending(&h.store, Duration::hours(23)).await;

    h.orch.approve(id).await.unwrap();
    assert_eq!(h.orch.timeout_expired_approvals().await.unwrap(), 0);
    assert_eq!(
        h.orch.get_intervention(id).await.unwrap().status,
        InterventionStatus::Executed
    );
}
