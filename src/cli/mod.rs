//! Command-line interface for intervene.
//!
//! Provides commands for proposing, approving and rejecting interventions,
//! inspecting records and the audit log, rolling back, checking outcomes,
//! and running the daemon that sweeps expired approvals and runs scheduled
//! outcome checks.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::LocalWorkspace;
use crate::config::{self, ResolvedConfig};
use crate::core::{
    db, AuditQuery, DeferredScheduler, Orchestrator, TaskScheduler, TokioScheduler,
};
use crate::domain::{AuditAction, InterventionKind, InterventionRecord};

pub mod metrics;

/// intervene - Approval-gated, reversible organizational interventions
#[derive(Parser, Debug)]
#[command(name = "intervene")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Propose an intervention (low and medium impact execute immediately)
    Propose {
        /// Intervention kind (e.g. reassign_manager, send_nudge)
        kind: String,

        /// Target entity ID
        target: String,

        /// Kind-specific parameters as a JSON object
        #[arg(short, long, default_value = "{}")]
        params: String,

        /// Why the intervention is proposed
        #[arg(short, long)]
        reason: String,
    },

    /// Approve a pending intervention and execute it
    Approve {
        /// Intervention ID (UUID)
        id: String,
    },

    /// Reject a pending intervention
    Reject {
        /// Intervention ID (UUID)
        id: String,

        /// Rejection reason
        #[arg(short, long)]
        reason: String,
    },

    /// List interventions waiting for approval
    Pending,

    /// Show an intervention and its audit trail
    Show {
        /// Intervention ID (UUID)
        id: String,
    },

    /// Roll back an executed intervention
    Rollback {
        /// Intervention ID (UUID)
        id: String,
    },

    /// Assess the outcome of an executed intervention now
    CheckOutcome {
        /// Intervention ID (UUID)
        id: String,
    },

    /// Time out pending approvals older than the approval window and fail
    /// executions that were interrupted part way
    Sweep,

    /// Query the audit log (newest first)
    Audit {
        /// Only entries of this intervention
        #[arg(short, long)]
        intervention: Option<String>,

        /// Only entries with this action (e.g. intervention_executed)
        #[arg(short, long)]
        action: Option<String>,

        /// Inclusive lower bound (RFC 3339)
        #[arg(long)]
        since: Option<String>,

        /// Inclusive upper bound (RFC 3339)
        #[arg(long)]
        until: Option<String>,

        /// Maximum number of entries to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Record and inspect entity metrics
    Metrics {
        #[command(subcommand)]
        command: metrics::MetricsCommands,
    },

    /// Run the daemon: periodic timeout sweep and scheduled outcome checks
    Serve,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = config::load()?;

        match self.command {
            Commands::Propose {
                kind,
                target,
                params,
                reason,
            } => propose(&config, &kind, &target, &params, &reason).await,
            Commands::Approve { id } => approve(&config, &id).await,
            Commands::Reject { id, reason } => reject(&config, &id, &reason).await,
            Commands::Pending => list_pending(&config).await,
            Commands::Show { id } => show_intervention(&config, &id).await,
            Commands::Rollback { id } => rollback(&config, &id).await,
            Commands::CheckOutcome { id } => check_outcome(&config, &id).await,
            Commands::Sweep => sweep(&config).await,
            Commands::Audit {
                intervention,
                action,
                since,
                until,
                limit,
            } => {
                query_audit(&config, intervention, action, since, until, limit).await
            }
            Commands::Metrics { command } => execute_metrics(&config, command).await,
            Commands::Serve => serve(&config).await,
            Commands::Config => show_config(&config),
        }
    }
}

/// Execute metrics subcommands
async fn execute_metrics(config: &ResolvedConfig, command: metrics::MetricsCommands) -> Result<()> {
    let (_, workspace) = open(config, Arc::new(DeferredScheduler))?;
    match command {
        metrics::MetricsCommands::Record {
            entity,
            centrality,
            burnout,
            at,
        } => metrics::execute_record(&workspace, &entity, centrality, burnout, at).await,
        metrics::MetricsCommands::Show { entity } => {
            metrics::execute_show(&workspace, &entity).await
        }
    }
}

/// Build the orchestrator over the configured database
fn open(
    config: &ResolvedConfig,
    scheduler: Arc<dyn TaskScheduler>,
) -> Result<(Orchestrator, Arc<LocalWorkspace>)> {
    let conn = db::open(&config.database, config.busy_timeout())
        .with_context(|| format!("Failed to open database: {}", config.database.display()))?;
    Orchestrator::local(conn, scheduler, config.orchestrator_settings())
}

/// Orchestrator for one-shot commands; outcome checks are left to `serve`
fn open_oneshot(config: &ResolvedConfig) -> Result<Orchestrator> {
    Ok(open(config, Arc::new(DeferredScheduler))?.0)
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("Invalid intervention ID: {}", id))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("Invalid RFC 3339 timestamp: {}", value))
}

fn print_summary(record: &InterventionRecord) {
    println!("Intervention: {}", record.id);
    println!("Type: {}", record.kind);
    println!("Target: {}", record.target_entity_id);
    println!("Impact: {}", record.impact_level);
    println!("Status: {}", record.status);
    if let Some(error) = &record.error {
        println!("Error: {}", error);
    }
}

async fn propose(
    config: &ResolvedConfig,
    kind: &str,
    target: &str,
    params: &str,
    reason: &str,
) -> Result<()> {
    let params: Value = serde_json::from_str(params).context("--params must be valid JSON")?;

    let orchestrator = open_oneshot(config)?;
    let id = orchestrator
        .propose(InterventionKind::from(kind), target, params, reason)
        .await?;

    let record = orchestrator.get_intervention(id).await?;
    print_summary(&record);
    Ok(())
}

async fn approve(config: &ResolvedConfig, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    let orchestrator = open_oneshot(config)?;
    let record = orchestrator.approve(id).await?;
    print_summary(&record);
    Ok(())
}

async fn reject(config: &ResolvedConfig, id: &str, reason: &str) -> Result<()> {
    let id = parse_id(id)?;
    let orchestrator = open_oneshot(config)?;
    let record = orchestrator.reject(id, reason).await?;
    print_summary(&record);
    Ok(())
}

async fn list_pending(config: &ResolvedConfig) -> Result<()> {
    let orchestrator = open_oneshot(config)?;
    let pending = orchestrator.get_pending_approvals().await?;

    if pending.is_empty() {
        println!("No pending approvals");
        return Ok(());
    }

    let deadline = orchestrator.settings().approval_timeout;
    println!(
        "{:<38} {:<22} {:<16} {:<20}",
        "INTERVENTION ID", "TYPE", "TARGET", "EXPIRES"
    );
    println!("{}", "-".repeat(96));

    for record in pending {
        println!(
            "{:<38} {:<22} {:<16} {:<20}",
            record.id,
            record.kind,
            record.target_entity_id,
            (record.proposed_at + deadline)
                .format("%Y-%m-%d %H:%M UTC")
                .to_string()
        );
    }

    Ok(())
}

async fn show_intervention(config: &ResolvedConfig, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    let orchestrator = open_oneshot(config)?;
    let record = orchestrator.get_intervention(id).await?;

    print_summary(&record);
    println!("Reason: {}", record.reason);
    println!("Params: {}", record.params);
    println!("Proposed: {}", record.proposed_at);
    if let Some(ts) = record.approved_at {
        println!("Approved: {}", ts);
    }
    if let Some(ts) = record.executed_at {
        println!("Executed: {}", ts);
    }
    if let Some(ts) = record.rolled_back_at {
        println!("Rolled back: {}", ts);
    }
    if let Some(result) = &record.result {
        println!("Result: {}", result);
    }
    if let Some(data) = &record.rollback_data {
        println!("Rollback data: {}", data);
    }
    if record.has_unfinished_execution() {
        println!(
            "Execution claimed but not finished; `intervene sweep` fails it once it is older than {} minutes",
            orchestrator.settings().interrupted_execution_after.num_minutes()
        );
    }

    let entries = orchestrator
        .query_audit_log(&AuditQuery::for_intervention(id))
        .await?;
    println!("\nAudit trail:");
    for entry in entries.iter().rev() {
        println!(
            "  {}  {:<26} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S%.6f"),
            entry.action,
            entry.details
        );
    }

    Ok(())
}

async fn rollback(config: &ResolvedConfig, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    let orchestrator = open_oneshot(config)?;
    let record = orchestrator.rollback(id).await?;
    print_summary(&record);
    Ok(())
}

async fn check_outcome(config: &ResolvedConfig, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    let orchestrator = open_oneshot(config)?;
    let assessment = orchestrator.check_intervention_outcome(id).await?;

    println!("Intervention: {}", assessment.intervention_id);
    println!("Negative: {}", assessment.is_negative);
    println!("Reason: {}", assessment.reason);
    if let Some(drop) = assessment.metrics.centrality_drop {
        println!("Centrality drop: {:.1}%", drop * 100.0);
    }
    if let Some(rise) = assessment.metrics.burnout_increase {
        println!("Burnout increase: {:.1}%", rise * 100.0);
    }
    println!("Rolled back: {}", assessment.auto_rollback_triggered);
    Ok(())
}

async fn sweep(config: &ResolvedConfig) -> Result<()> {
    let orchestrator = open_oneshot(config)?;
    let count = orchestrator.timeout_expired_approvals().await?;
    println!("Timed out {} pending approval(s)", count);
    let recovered = orchestrator.fail_interrupted_executions().await?;
    if recovered > 0 {
        println!("Failed {} interrupted execution(s)", recovered);
    }
    Ok(())
}

async fn query_audit(
    config: &ResolvedConfig,
    intervention: Option<String>,
    action: Option<String>,
    since: Option<String>,
    until: Option<String>,
    limit: usize,
) -> Result<()> {
    let query = AuditQuery {
        start: since.as_deref().map(parse_time).transpose()?,
        end: until.as_deref().map(parse_time).transpose()?,
        intervention_id: intervention.as_deref().map(parse_id).transpose()?,
        action: action
            .as_deref()
            .map(str::parse::<AuditAction>)
            .transpose()?,
        limit: Some(limit),
    };

    let orchestrator = open_oneshot(config)?;
    let entries = orchestrator.query_audit_log(&query).await?;

    if entries.is_empty() {
        println!("No audit entries found");
        return Ok(());
    }

    println!(
        "{:<28} {:<26} {:<38}",
        "TIMESTAMP", "ACTION", "INTERVENTION ID"
    );
    println!("{}", "-".repeat(92));

    for entry in entries {
        println!(
            "{:<28} {:<26} {:<38}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            entry.action,
            entry.intervention_id
        );
    }

    Ok(())
}

/// Run until interrupted: on every tick, sweep expired approvals, fail
/// interrupted executions and pick up unchecked executed records (including
/// those executed by other CLI commands); run outcome checks as they come due
async fn serve(config: &ResolvedConfig) -> Result<()> {
    let (scheduler, mut due_tasks) = TokioScheduler::channel();
    let (orchestrator, _) = open(config, Arc::new(scheduler))?;

    info!(
        database = %config.database.display(),
        sweep_interval_secs = config.sweep_interval().as_secs(),
        "Daemon started"
    );

    let mut sweep = tokio::time::interval(config.sweep_interval());
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = sweep.tick() => {
                if let Err(e) = orchestrator.timeout_expired_approvals().await {
                    warn!(error = %e, "Timeout sweep failed");
                }
                if let Err(e) = orchestrator.fail_interrupted_executions().await {
                    warn!(error = %e, "Interrupted execution recovery failed");
                }
                if let Err(e) = orchestrator.reschedule_outcome_checks().await {
                    warn!(error = %e, "Outcome check scheduling failed");
                }
            }
            Some(task) = due_tasks.recv() => {
                orchestrator.handle_task(task).await;
            }
            result = &mut shutdown => {
                result.context("Failed to listen for shutdown signal")?;
                info!("Shutting down");
                break;
            }
        }
    }

    let failed = orchestrator.audit_log().failed_writes();
    if failed > 0 {
        warn!(failed, "Audit writes failed during this session");
    }
    Ok(())
}

fn show_config(config: &ResolvedConfig) -> Result<()> {
    println!("intervene configuration\n");

    if let Some(ref path) = config.config_file {
        println!("Config file: {}", path.display());
    } else {
        println!("Config file: (none, using defaults)");
    }

    println!("Home: {}", config.home.display());
    println!("Database: {}", config.database.display());
    println!();
    println!("Approval timeout: {}h", config.approval.timeout_hours);
    println!("Sweep interval: {}s", config.approval.sweep_interval_seconds);
    println!("Outcome check delay: {}d", config.outcome.check_delay_days);
    println!(
        "Negative outcome: centrality drop > {:.0}%, burnout increase > {:.0}%",
        config.outcome.centrality_drop_threshold * 100.0,
        config.outcome.burnout_increase_threshold * 100.0
    );
    println!(
        "Circuit breaker: {} failures, {}s reset",
        config.breaker.failure_threshold, config.breaker.reset_timeout_seconds
    );
    println!("Store busy timeout: {}ms", config.store.busy_timeout_ms);
    println!("Audit page size: {}", config.audit.page_size);

    let env_home = std::env::var(config::ENV_HOME).ok();
    let env_db = std::env::var(config::ENV_DB).ok();
    if env_home.is_some() || env_db.is_some() {
        println!("\nEnvironment overrides:");
        if let Some(h) = env_home {
            println!("  {}={}", config::ENV_HOME, h);
        }
        if let Some(d) = env_db {
            println!("  {}={}", config::ENV_DB, d);
        }
    }

    Ok(())
}
