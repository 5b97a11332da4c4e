//! Configuration Integration Tests
//!
//! Tests for config discovery and for running the orchestrator against the
//! database a resolved config points at.

use std::path::Path;
use std::sync::Arc;

use chrono::Duration;
use intervene::config::{self, CONFIG_DIR, CONFIG_FILE, ENV_DB};
use intervene::core::{db, DeferredScheduler};
use intervene::domain::{InterventionKind, InterventionStatus};
use intervene::Orchestrator;
use serde_json::json;
use tempfile::TempDir;

fn write_config(root: &Path, body: &str) {
    let dir = root.join(CONFIG_DIR);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(CONFIG_FILE), body).unwrap();
}

#[test]
fn test_project_config_shapes_orchestrator_settings() {
    let temp = TempDir::new().unwrap();
    write_config(
        temp.path(),
        r#"
paths:
  home: ./state
approval:
  timeout_hours: 72
outcome:
  check_delay_days: 14
  burnout_increase_threshold: 0.5
breaker:
  failure_threshold: 2
"#,
    );
    let project = temp.path().join("services").join("people");
    std::fs::create_dir_all(&project).unwrap();

    let config = config::load_from(&project, Path::new("/unused"), |_| None).unwrap();
    let settings = config.orchestrator_settings();

    assert_eq!(settings.approval_timeout, Duration::hours(72));
    assert_eq!(settings.outcome_check_delay, Duration::days(14));
    assert_eq!(settings.thresholds.burnout_increase, 0.5);
    assert_eq!(settings.thresholds.centrality_drop, 0.30);
    assert_eq!(settings.breaker.failure_threshold, 2);
    assert_eq!(settings.breaker.reset_timeout_seconds, 60);
    assert!(config.database.starts_with(temp.path().join(CONFIG_DIR)));
}

#[tokio::test]
async fn test_records_persist_across_reopen() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("data").join("interventions.db");
    let db_env = db_path.display().to_string();

    let config = config::load_from(temp.path(), &temp.path().join("home"), |key| {
        (key == ENV_DB).then(|| db_env.clone())
    })
    .unwrap();
    assert_eq!(config.database, db_path);

    let id = {
        let conn = db::open(&config.database, config.busy_timeout()).unwrap();
        let (orch, _) = Orchestrator::local(
            conn,
            Arc::new(DeferredScheduler),
            config.orchestrator_settings(),
        )
        .unwrap();
        orch.propose(
            InterventionKind::ReassignManager,
            "emp_1",
            json!({ "new_manager_id": "emp_2" }),
            "restructure",
        )
        .await
        .unwrap()
    };

    let conn = db::open(&config.database, config.busy_timeout()).unwrap();
    let (orch, _) = Orchestrator::local(
        conn,
        Arc::new(DeferredScheduler),
        config.orchestrator_settings(),
    )
    .unwrap();

    let pending = orch.get_pending_approvals().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
    assert_eq!(pending[0].status, InterventionStatus::PendingApproval);
}
