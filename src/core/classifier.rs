//! Impact classification.
//!
//! Maps an intervention kind to the severity tier that decides whether a
//! human has to approve it. Identity- and compensation-altering actions are
//! high impact, scheduling and workload actions are medium, everything else
//! (including unrecognized kinds) is low.

use serde_json::Value;

use crate::domain::{ImpactLevel, InterventionKind};

/// Classify an intervention. Pure and total.
///
/// `params` is accepted so that future rules can depend on the payload; the
/// current tiers depend on the kind alone.
pub fn classify(kind: &InterventionKind, _params: &Value) -> ImpactLevel {
    match kind {
        InterventionKind::ReassignManager
        | InterventionKind::TransferTeam
        | InterventionKind::ChangeRole
        | InterventionKind::AdjustCompensation => ImpactLevel::High,

        InterventionKind::ScheduleFocusTime
        | InterventionKind::RedistributeWorkload
        | InterventionKind::CapMeetingHours => ImpactLevel::Medium,

        InterventionKind::SendRecognition
        | InterventionKind::SendNudge
        | InterventionKind::Unknown(_) => ImpactLevel::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_high_impact_kinds() {
        for tag in ["reassign_manager", "transfer_team", "change_role", "adjust_compensation"] {
            assert_eq!(
                classify(&InterventionKind::from(tag), &json!({})),
                ImpactLevel::High,
                "{} should be high impact",
                tag
            );
        }
    }

    #[test]
    fn test_medium_impact_kinds() {
        for tag in ["schedule_focus_time", "redistribute_workload", "cap_meeting_hours"] {
            assert_eq!(
                classify(&InterventionKind::from(tag), &json!({})),
                ImpactLevel::Medium
            );
        }
    }

    #[test]
    fn test_unknown_defaults_to_low() {
        assert_eq!(
            classify(&InterventionKind::from("rename_slack_channel"), &json!({"a": 1})),
            ImpactLevel::Low
        );
        assert_eq!(
            classify(&InterventionKind::from(""), &Value::Null),
            ImpactLevel::Low
        );
    }

    #[test]
    fn test_params_do_not_change_tier() {
        let kind = InterventionKind::SendNudge;
        assert_eq!(classify(&kind, &json!({})), classify(&kind, &json!({"urgent": true})));
    }
}
