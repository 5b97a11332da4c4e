//! Post-execution metrics and outcome assessments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metrics of a single entity at (or averaged around) a point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Network centrality in the collaboration graph
    pub centrality: f64,

    /// Burnout risk score
    pub burnout_score: f64,

    /// When the snapshot was taken (latest sample for averaged snapshots)
    pub recorded_at: DateTime<Utc>,
}

/// Relative changes between the baseline and the post-execution metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeMetrics {
    /// Last snapshot before execution
    pub baseline: Option<MetricsSnapshot>,

    /// Averaged snapshot after execution
    pub current: Option<MetricsSnapshot>,

    /// Fractional centrality drop relative to baseline (positive = drop)
    pub centrality_drop: Option<f64>,

    /// Fractional burnout increase relative to baseline (positive = worse)
    pub burnout_increase: Option<f64>,
}

/// Result of re-evaluating an executed intervention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeAssessment {
    pub intervention_id: Uuid,

    /// Whether any negative-outcome rule fired
    pub is_negative: bool,

    pub metrics: OutcomeMetrics,

    /// Human-readable explanation
    pub reason: String,

    /// Set when the negative outcome caused a rollback
    pub auto_rollback_triggered: bool,

    pub assessed_at: DateTime<Utc>,
}
