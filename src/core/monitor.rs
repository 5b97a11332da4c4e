//! Post-execution outcome assessment.
//!
//! The monitor compares an entity's last metrics snapshot before execution
//! with the averaged snapshots after it. It only decides; rolling back and
//! auditing are done by the orchestrator.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{MetricsSnapshot, OutcomeAssessment, OutcomeMetrics};

/// Negative-outcome rules
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeThresholds {
    /// Fractional centrality drop that counts as negative
    #[serde(default = "default_centrality_drop")]
    pub centrality_drop: f64,

    /// Fractional burnout increase that counts as negative
    #[serde(default = "default_burnout_increase")]
    pub burnout_increase: f64,
}

fn default_centrality_drop() -> f64 {
    0.30
}
fn default_burnout_increase() -> f64 {
    0.20
}

impl Default for OutcomeThresholds {
    fn default() -> Self {
        Self {
            centrality_drop: default_centrality_drop(),
            burnout_increase: default_burnout_increase(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OutcomeMonitor {
    thresholds: OutcomeThresholds,
}

impl OutcomeMonitor {
    pub fn new(thresholds: OutcomeThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> OutcomeThresholds {
        self.thresholds
    }

    /// Assess an intervention from its baseline and post-execution metrics.
    ///
    /// Relative changes are only computed against a positive baseline; a
    /// zero baseline cannot drop and any rise from it is not a ratio.
    pub fn assess(
        &self,
        intervention_id: Uuid,
        baseline: Option<MetricsSnapshot>,
        current: Option<MetricsSnapshot>,
    ) -> OutcomeAssessment {
        let (Some(before), Some(after)) = (baseline, current) else {
            let missing = if baseline.is_none() {
                "no baseline before execution"
            } else {
                "no metrics recorded since execution"
            };
            return OutcomeAssessment {
                intervention_id,
                is_negative: false,
                metrics: OutcomeMetrics {
                    baseline,
                    current,
                    ..Default::default()
                },
                reason: format!("Insufficient data: {}", missing),
                auto_rollback_triggered: false,
                assessed_at: Utc::now(),
            };
        };

        let centrality_drop = relative(before.centrality, before.centrality - after.centrality);
        let burnout_increase = relative(before.burnout_score, after.burnout_score - before.burnout_score);

        let mut findings = Vec::new();
        if let Some(drop) = centrality_drop {
            if drop > self.thresholds.centrality_drop {
                findings.push(format!(
                    "centrality dropped {:.1}% (limit {:.1}%)",
                    drop * 100.0,
                    self.thresholds.centrality_drop * 100.0
                ));
            }
        }
        if let Some(rise) = burnout_increase {
            if rise > self.thresholds.burnout_increase {
                findings.push(format!(
                    "burnout rose {:.1}% (limit {:.1}%)",
                    rise * 100.0,
                    self.thresholds.burnout_increase * 100.0
                ));
            }
        }

        let is_negative = !findings.is_empty();
        let reason = if is_negative {
            format!("Negative outcome: {}", findings.join("; "))
        } else {
            "Metrics within thresholds".to_string()
        };

        OutcomeAssessment {
            intervention_id,
            is_negative,
            metrics: OutcomeMetrics {
                baseline: Some(before),
                current: Some(after),
                centrality_drop,
                burnout_increase,
            },
            reason,
            auto_rollback_triggered: false,
            assessed_at: Utc::now(),
        }
    }
}

fn relative(base: f64, delta: f64) -> Option<f64> {
    (base > 0.0).then(|| delta / base)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(centrality: f64, burnout_score: f64) -> Option<MetricsSnapshot> {
        Some(MetricsSnapshot {
            centrality,
            burnout_score,
            recorded_at: Utc::now(),
        })
    }

    #[test]
    fn test_centrality_drop_over_threshold_is_negative() {
        let monitor = OutcomeMonitor::default();
        let a = monitor.assess(Uuid::new_v4(), snapshot(0.50, 0.4), snapshot(0.34, 0.4));
        assert!(a.is_negative);
        assert!(a.reason.contains("centrality"));
        assert!((a.metrics.centrality_drop.unwrap() - 0.32).abs() < 1e-9);
    }

    #[test]
    fn test_centrality_drop_under_threshold_is_not_negative() {
        let monitor = OutcomeMonitor::default();
        let a = monitor.assess(Uuid::new_v4(), snapshot(0.50, 0.4), snapshot(0.36, 0.4));
        assert!(!a.is_negative);
        assert!(!a.auto_rollback_triggered);
    }

    #[test]
    fn test_burnout_increase_is_negative() {
        let monitor = OutcomeMonitor::default();
        let a = monitor.assess(Uuid::new_v4(), snapshot(0.5, 0.50), snapshot(0.5, 0.65));
        assert!(a.is_negative);
        assert!(a.reason.contains("burnout"));
    }

    #[test]
    fn test_missing_data_is_insufficient() {
        let monitor = OutcomeMonitor::default();
        let a = monitor.assess(Uuid::new_v4(), None, snapshot(0.1, 0.9));
        assert!(!a.is_negative);
        assert!(a.reason.starts_with("Insufficient data"));

        let a = monitor.assess(Uuid::new_v4(), snapshot(0.5, 0.5), None);
        assert!(!a.is_negative);
        assert!(a.metrics.baseline.is_some());
    }

    #[test]
    fn test_zero_baseline_has_no_ratio() {
        let monitor = OutcomeMonitor::default();
        let a = monitor.assess(Uuid::new_v4(), snapshot(0.0, 0.0), snapshot(0.0, 0.3));
        assert!(!a.is_negative);
        assert!(a.metrics.burnout_increase.is_none());
    }

    #[test]
    fn test_custom_thresholds() {
        let monitor = OutcomeMonitor::new(OutcomeThresholds {
            centrality_drop: 0.10,
            burnout_increase: 0.20,
        });
        let a = monitor.assess(Uuid::new_v4(), snapshot(0.50, 0.4), snapshot(0.40, 0.4));
        assert!(a.is_negative);
    }
}
