//! Condition management helpers following Kubernetes API conventions

use chrono::Utc;

use crate::crd::{OperatorCondition, OperatorStatus, VersionAvailability};

/// Condition types written by every reconciler
pub const CONDITION_TYPE_AVAILABLE: &str = "Available";
pub const CONDITION_TYPE_SYNC_SUCCESSFUL: &str = "SyncSuccessful";

/// Standard condition statuses
pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";
pub const CONDITION_STATUS_UNKNOWN: &str = "Unknown";

/// Update or add a condition to the conditions list
///
/// The transition time moves only when the status changes, so re-asserting the
/// same condition leaves the list equal to what it was.
pub fn set_condition(
    conditions: &mut Vec<OperatorCondition>,
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status {
            existing.status = status.to_string();
            existing.last_transition_time = Utc::now().to_rfc3339();
        }
        existing.reason = reason.to_string();
        existing.message = message.to_string();
    } else {
        conditions.push(OperatorCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            last_transition_time: Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}

/// Find a condition by type
pub fn find_condition<'a>(
    conditions: &'a [OperatorCondition],
    type_: &str,
) -> Option<&'a OperatorCondition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Check if a condition is true
pub fn is_condition_true(conditions: &[OperatorCondition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(|c| c.status == CONDITION_STATUS_TRUE)
        .unwrap_or(false)
}

/// Recompute `Available` and `SyncSuccessful` from the recorded availabilities
///
/// Available follows the ready replicas of the current version. SyncSuccessful is
/// false while either availability or the last run reported errors.
pub fn set_availability_conditions(status: &mut OperatorStatus) {
    let (available, reason, message) = match &status.current_version_availability {
        Some(current) if current.ready_replicas > 0 => (
            CONDITION_STATUS_TRUE,
            "AsExpected",
            format!(
                "{} of version {} ready",
                current.ready_replicas, current.version
            ),
        ),
        Some(current) => (
            CONDITION_STATUS_FALSE,
            "NoReplicasReady",
            format!("no replicas of version {} are ready", current.version),
        ),
        None => (
            CONDITION_STATUS_UNKNOWN,
            "NoVersion",
            "no version has been deployed".to_string(),
        ),
    };
    set_condition(
        &mut status.conditions,
        CONDITION_TYPE_AVAILABLE,
        available,
        reason,
        &message,
    );

    let errors: Vec<&str> = availability_errors(&status.current_version_availability)
        .chain(availability_errors(&status.target_version_availability))
        .chain(status.last_unsuccessful_run_errors.iter().map(String::as_str))
        .collect();
    if errors.is_empty() {
        set_condition(
            &mut status.conditions,
            CONDITION_TYPE_SYNC_SUCCESSFUL,
            CONDITION_STATUS_TRUE,
            "AsExpected",
            "",
        );
    } else {
        set_condition(
            &mut status.conditions,
            CONDITION_TYPE_SYNC_SUCCESSFUL,
            CONDITION_STATUS_FALSE,
            "SyncError",
            &errors.join("\n"),
        );
    }
}

fn availability_errors(
    availability: &Option<VersionAvailability>,
) -> impl Iterator<Item = &str> {
    availability
        .iter()
        .flat_map(|a| a.errors.iter().map(String::as_str))
}
