//! Metrics CLI subcommands for the local workspace.
//!
//! Provides commands to:
//! - `record`: Add a metrics sample for an entity
//! - `show`: Display the latest sample of an entity

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;

use crate::adapters::{GraphStore, LocalWorkspace};
use crate::domain::MetricsSnapshot;

/// Metrics-related subcommands
#[derive(Subcommand, Debug)]
pub enum MetricsCommands {
    /// Record a metrics sample
    Record {
        /// Entity ID
        entity: String,

        /// Network centrality
        #[arg(long)]
        centrality: f64,

        /// Burnout risk score
        #[arg(long)]
        burnout: f64,

        /// Sample time (RFC 3339, defaults to now)
        #[arg(long)]
        at: Option<String>,
    },

    /// Show the latest sample of an entity
    Show {
        /// Entity ID
        entity: String,
    },
}

pub async fn execute_record(
    workspace: &LocalWorkspace,
    entity: &str,
    centrality: f64,
    burnout: f64,
    at: Option<String>,
) -> Result<()> {
    anyhow::ensure!(
        centrality.is_finite() && burnout.is_finite(),
        "Metrics must be finite numbers"
    );

    let recorded_at = match at {
        Some(ts) => DateTime::parse_from_rfc3339(&ts)
            .with_context(|| format!("Invalid RFC 3339 timestamp: {}", ts))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    workspace
        .record_metrics(
            entity,
            MetricsSnapshot {
                centrality,
                burnout_score: burnout,
                recorded_at,
            },
        )
        .await?;

    println!(
        "Recorded {} at {}: centrality {:.3}, burnout {:.3}",
        entity, recorded_at, centrality, burnout
    );
    Ok(())
}

pub async fn execute_show(workspace: &LocalWorkspace, entity: &str) -> Result<()> {
    match workspace.read_entity_metrics(entity).await? {
        Some(snapshot) => {
            println!("Entity: {}", entity);
            println!("Recorded: {}", snapshot.recorded_at);
            println!("Centrality: {:.3}", snapshot.centrality);
            println!("Burnout: {:.3}", snapshot.burnout_score);
        }
        None => println!("No metrics recorded for {}", entity),
    }
    Ok(())
}
